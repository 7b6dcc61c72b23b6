use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::core::{ApiResource, DynamicObject};
use kube::Client;
use tracing::debug;

use super::{selector, ClusterClient, GatewayError, Labels};

/// [`ClusterClient`] backed by a live API server
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster configuration
    pub async fn try_default() -> Result<Self, GatewayError> {
        let client = Client::try_default()
            .await
            .map_err(|e| GatewayError::Transport {
                what: "kubernetes client".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    fn api(&self, api: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, api),
            None => Api::all_with(self.client.clone(), api),
        }
    }
}

fn what(api: &ApiResource, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", api.kind, ns, name),
        None => format!("{} {}", api.kind, name),
    }
}

/// Map a kube error onto the gateway taxonomy with a readable message
fn classify(err: kube::Error, kind: &str, name: &str, what: String) -> GatewayError {
    match &err {
        kube::Error::Api(response) if response.code == 404 => GatewayError::NotFound(what),
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            GatewayError::AlreadyExists(what)
        }
        kube::Error::Api(response) => GatewayError::Api {
            what,
            code: response.code,
            message: improve_error_message(&err, kind, name),
        },
        kube::Error::SerdeError(e) => GatewayError::Serialization {
            what,
            message: e.to_string(),
        },
        _ => GatewayError::Transport {
            what,
            message: improve_error_message(&err, kind, name),
        },
    }
}

/// Improve a kube error message with human-readable context
///
/// Parses common Kubernetes error patterns and returns a more
/// understandable message.
fn improve_error_message(err: &kube::Error, resource_kind: &str, resource_name: &str) -> String {
    let raw = err.to_string();

    if raw.contains("ImagePullBackOff") || raw.contains("ErrImagePull") {
        if let Some(start) = raw.find("image \"") {
            if let Some(end) = raw[start + 7..].find('"') {
                let image = &raw[start + 7..start + 7 + end];
                return format!(
                    "{resource_kind} '{resource_name}' failed: image '{image}' not found or inaccessible"
                );
            }
        }
        return format!("{resource_kind} '{resource_name}' failed: image pull error");
    }

    if raw.contains("Forbidden") || raw.contains("403") {
        return format!("{resource_kind} '{resource_name}': permission denied (check RBAC)");
    }

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("{resource_kind} '{resource_name}': cannot connect to Kubernetes API");
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return format!("{resource_kind} '{resource_name}': operation timed out");
    }

    format!("{resource_kind} '{resource_name}': {raw}")
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, GatewayError> {
        self.api(api, namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(e, &api.kind, name, what(api, namespace, name)))
    }

    async fn create(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GatewayError> {
        let name = object.metadata.name.as_deref().unwrap_or_default();
        debug!(kind = %api.kind, namespace = ?namespace, name, "Creating object");
        self.api(api, namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| classify(e, &api.kind, name, what(api, namespace, name)))
    }

    async fn replace(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GatewayError> {
        let name = object.metadata.name.as_deref().unwrap_or_default();
        debug!(kind = %api.kind, namespace = ?namespace, name, "Replacing object");
        self.api(api, namespace)
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| classify(e, &api.kind, name, what(api, namespace, name)))
    }

    async fn delete(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, GatewayError> {
        debug!(kind = %api.kind, namespace = ?namespace, name, "Deleting object");
        match self
            .api(api, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match classify(e, &api.kind, name, what(api, namespace, name)) {
                GatewayError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn list(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<DynamicObject>, GatewayError> {
        let mut params = ListParams::default();
        if !labels.is_empty() {
            params = params.labels(&selector(labels));
        }
        let list = self
            .api(api, namespace)
            .list(&params)
            .await
            .map_err(|e| classify(e, &api.kind, "*", what(api, namespace, "*")))?;
        Ok(list.items)
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, GatewayError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.logs(pod, &LogParams::default())
            .await
            .map_err(|e| classify(e, "Pod", pod, format!("Pod {namespace}/{pod}")))
    }
}
