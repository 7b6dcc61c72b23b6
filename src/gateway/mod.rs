//! Typed CRUD over platform objects through a pluggable client
//!
//! [`ClusterClient`] is the seam: it speaks [`DynamicObject`] and knows
//! nothing about the harness. [`Gateway`] layers typed helpers on top,
//! converting through JSON, so callers work with `Subscription`,
//! `Deployment`, `KogitoRuntime` and so on.
//!
//! No method retries. Not-found is reported as `Ok(None)` / `Ok(false)`,
//! never as an error, and everything else is a [`GatewayError`] that knows
//! whether it is worth retrying.
//!
//! # Example
//!
//! ```ignore
//! use kogito_bdd::crd::Subscription;
//! use kogito_bdd::gateway::{Gateway, KubeClient};
//!
//! let gateway = Gateway::new(Arc::new(KubeClient::try_default().await?));
//! if let Some(sub) = gateway.fetch_by_key::<Subscription>(Some("ns"), "kogito-operator").await? {
//!     println!("{:?}", sub.current_csv());
//! }
//! ```

mod kube_client;
mod memory;

pub use kube_client::KubeClient;
pub use memory::{Call, MemoryCluster, Objects, Verb};

use async_trait::async_trait;
use kube::core::{ApiResource, DynamicObject, TypeMeta};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::wait::PollError;

/// Label set used both for object labels and equality selectors
pub type Labels = BTreeMap<String, String>;

/// Errors from cluster operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{what}: API error {code}: {message}")]
    Api {
        what: String,
        code: u16,
        message: String,
    },

    #[error("{what}: cannot reach the cluster: {message}")]
    Transport { what: String, message: String },

    #[error("{what}: cannot convert object: {message}")]
    Serialization { what: String, message: String },

    #[error("{0}: cancelled")]
    Cancelled(String),
}

impl GatewayError {
    /// Whether a later identical call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Api { code, .. } => matches!(code, 408 | 429) || *code >= 500,
            _ => false,
        }
    }
}

impl From<GatewayError> for PollError {
    fn from(err: GatewayError) -> Self {
        if err.is_transient() {
            PollError::Transient(err.to_string())
        } else {
            PollError::Fatal(err.to_string())
        }
    }
}

/// The operations the harness needs from a cluster
///
/// Implemented by [`KubeClient`] for a live cluster and by [`MemoryCluster`]
/// for tests. `namespace: None` addresses cluster-scoped objects, or all
/// namespaces when listing.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, GatewayError>;

    /// Fails with [`GatewayError::AlreadyExists`] when the name is taken
    async fn create(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GatewayError>;

    /// Fails with [`GatewayError::NotFound`] when the object is absent
    async fn replace(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        object: &DynamicObject,
    ) -> Result<DynamicObject, GatewayError>;

    /// Returns `false` when there was nothing to delete
    async fn delete(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, GatewayError>;

    async fn list(
        &self,
        api: &ApiResource,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<DynamicObject>, GatewayError>;

    async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, GatewayError>;
}

/// Bound shared by every typed object the gateway handles
pub trait Object:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{
}

impl<T> Object for T where
    T: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static
{
}

/// Identity of a cluster object, kept for teardown
#[derive(Debug, Clone)]
pub struct ResourceRef {
    pub api: ApiResource,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn new<K: Object>(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            api: ApiResource::erase::<K>(&()),
            namespace: namespace.map(str::to_string),
            name: name.into(),
        }
    }

    /// Reference to an existing typed object, `None` if it has no name
    pub fn of<K: Object>(object: &K) -> Option<Self> {
        let name = object.meta().name.clone()?;
        Some(Self::new::<K>(object.meta().namespace.as_deref(), name))
    }

    pub fn kind(&self) -> &str {
        &self.api.kind
    }

    pub fn is<K: Object>(&self) -> bool {
        self.api.kind == K::kind(&()) && self.api.group == K::group(&())
    }
}

impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.api.api_version == other.api.api_version
            && self.api.kind == other.api.kind
            && self.namespace == other.namespace
            && self.name == other.name
    }
}

impl Eq for ResourceRef {}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.api.kind, ns, self.name),
            None => write!(f, "{} {}", self.api.kind, self.name),
        }
    }
}

/// Render labels as an equality selector (`a=b,c=`)
pub fn selector(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `object_labels` satisfies every pair in `selector`
pub fn labels_match(object_labels: Option<&Labels>, selector: &Labels) -> bool {
    selector.iter().all(|(key, value)| {
        object_labels
            .and_then(|labels| labels.get(key))
            .is_some_and(|actual| actual == value)
    })
}

pub(crate) fn describe<K: Object>(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{} {}/{}", K::kind(&()), ns, name),
        None => format!("{} {}", K::kind(&()), name),
    }
}

pub(crate) fn to_dynamic<K: Object>(object: &K) -> Result<DynamicObject, GatewayError> {
    let what = || describe::<K>(object.meta().namespace.as_deref(), object.meta().name.as_deref().unwrap_or("?"));
    let value = serde_json::to_value(object).map_err(|e| GatewayError::Serialization {
        what: what(),
        message: e.to_string(),
    })?;
    let mut dynamic: DynamicObject =
        serde_json::from_value(value).map_err(|e| GatewayError::Serialization {
            what: what(),
            message: e.to_string(),
        })?;
    dynamic.types.get_or_insert_with(|| type_meta(&ApiResource::erase::<K>(&())));
    Ok(dynamic)
}

pub(crate) fn from_dynamic<K: Object>(mut object: DynamicObject) -> Result<K, GatewayError> {
    // list responses omit apiVersion/kind on items
    object
        .types
        .get_or_insert_with(|| type_meta(&ApiResource::erase::<K>(&())));
    let what = describe::<K>(object.metadata.namespace.as_deref(), object.metadata.name.as_deref().unwrap_or("?"));
    let value = serde_json::to_value(&object).map_err(|e| GatewayError::Serialization {
        what: what.clone(),
        message: e.to_string(),
    })?;
    serde_json::from_value(value).map_err(|e| GatewayError::Serialization {
        what,
        message: e.to_string(),
    })
}

pub(crate) fn type_meta(api: &ApiResource) -> TypeMeta {
    TypeMeta {
        api_version: api.api_version.clone(),
        kind: api.kind.clone(),
    }
}

fn is_cluster_scoped<K: Object>() -> bool {
    // only the handful of cluster-scoped kinds the harness touches
    matches!(&*K::kind(&()), "Namespace" | "ClusterRole" | "ClusterRoleBinding" | "CustomResourceDefinition")
}

fn scope<'a, K: Object>(namespace: Option<&'a str>) -> Option<&'a str> {
    if is_cluster_scoped::<K>() {
        None
    } else {
        namespace
    }
}

/// Typed facade over a [`ClusterClient`]
///
/// With a cancellation token every request is abandoned once the token
/// fires. Without one, requests always run to completion.
#[derive(Clone)]
pub struct Gateway {
    client: Arc<dyn ClusterClient>,
    cancel: Option<CancellationToken>,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client, cancel: None }
    }

    /// Same client, abandoning requests when `token` is cancelled
    pub fn with_cancel(&self, token: CancellationToken) -> Self {
        Self {
            client: self.client.clone(),
            cancel: Some(token),
        }
    }

    async fn guard<T>(
        &self,
        kind: &str,
        name: &str,
        request: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let Some(token) = &self.cancel else {
            return request.await;
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(GatewayError::Cancelled(format!("{kind} {name}"))),
            result = request => result,
        }
    }

    pub fn client(&self) -> &Arc<dyn ClusterClient> {
        &self.client
    }

    /// Refresh `object` in place from the cluster, returning whether it exists
    pub async fn fetch<K: Object>(&self, object: &mut K) -> Result<bool, GatewayError> {
        let name = object.meta().name.clone().unwrap_or_default();
        let namespace = object.meta().namespace.clone();
        match self.fetch_by_key::<K>(namespace.as_deref(), &name).await? {
            Some(current) => {
                *object = current;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn fetch_by_key<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, GatewayError> {
        let api = ApiResource::erase::<K>(&());
        let request = self.client.get(&api, scope::<K>(namespace), name);
        match self.guard(&api.kind, name, request).await? {
            Some(object) => Ok(Some(from_dynamic(object)?)),
            None => Ok(None),
        }
    }

    /// Create `object` unless one with the same name exists; `true` if created
    pub async fn create_if_absent<K: Object>(&self, object: &K) -> Result<bool, GatewayError> {
        let api = ApiResource::erase::<K>(&());
        let namespace = scope::<K>(object.meta().namespace.as_deref());
        let name = object.meta().name.as_deref().unwrap_or_default();

        let existing = self.guard(&api.kind, name, self.client.get(&api, namespace, name)).await?;
        if existing.is_some() {
            debug!(kind = %api.kind, name, "Object already present");
            return Ok(false);
        }

        let dynamic = to_dynamic(object)?;
        match self.guard(&api.kind, name, self.client.create(&api, namespace, &dynamic)).await {
            Ok(_) => {
                debug!(kind = %api.kind, name, "Created object");
                Ok(true)
            }
            Err(GatewayError::AlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Replace the stored object, carrying over its resource version
    pub async fn update<K: Object>(&self, object: &K) -> Result<K, GatewayError> {
        let api = ApiResource::erase::<K>(&());
        let namespace = scope::<K>(object.meta().namespace.as_deref());
        let name = object.meta().name.as_deref().unwrap_or_default();

        let mut dynamic = to_dynamic(object)?;
        if dynamic.metadata.resource_version.is_none() {
            if let Some(current) = self.guard(&api.kind, name, self.client.get(&api, namespace, name)).await? {
                dynamic.metadata.resource_version = current.metadata.resource_version;
            }
        }
        from_dynamic(self.guard(&api.kind, name, self.client.replace(&api, namespace, &dynamic)).await?)
    }

    /// Create if absent, otherwise update when the desired spec differs
    ///
    /// Returns the stored object.
    pub async fn apply<K: Object>(&self, object: &K) -> Result<K, GatewayError> {
        let api = ApiResource::erase::<K>(&());
        let namespace = scope::<K>(object.meta().namespace.as_deref());
        let name = object.meta().name.as_deref().unwrap_or_default();

        let Some(current) = self.guard(&api.kind, name, self.client.get(&api, namespace, name)).await? else {
            let dynamic = to_dynamic(object)?;
            return match self.guard(&api.kind, name, self.client.create(&api, namespace, &dynamic)).await {
                Ok(created) => from_dynamic(created),
                Err(GatewayError::AlreadyExists(_)) => self.update(object).await,
                Err(e) => Err(e),
            };
        };

        let desired = to_dynamic(object)?;
        if desired.data.get("spec") == current.data.get("spec") {
            debug!(kind = %api.kind, name, "Object up to date");
            return from_dynamic(current);
        }

        debug!(kind = %api.kind, name, "Spec drifted, updating");
        let mut desired = desired;
        desired.metadata.resource_version = current.metadata.resource_version;
        from_dynamic(self.guard(&api.kind, name, self.client.replace(&api, namespace, &desired)).await?)
    }

    /// Delete `object`; `false` when it was already gone
    pub async fn delete<K: Object>(&self, object: &K) -> Result<bool, GatewayError> {
        let name = object.meta().name.as_deref().unwrap_or_default();
        self.delete_by_key::<K>(object.meta().namespace.as_deref(), name)
            .await
    }

    pub async fn delete_by_key<K: Object>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<bool, GatewayError> {
        let api = ApiResource::erase::<K>(&());
        let request = self.client.delete(&api, scope::<K>(namespace), name);
        self.guard(&api.kind, name, request).await
    }

    pub async fn delete_ref(&self, resource: &ResourceRef) -> Result<bool, GatewayError> {
        let request = self
            .client
            .delete(&resource.api, resource.namespace.as_deref(), &resource.name);
        self.guard(&resource.api.kind, &resource.name, request).await
    }

    pub async fn exists(&self, resource: &ResourceRef) -> Result<bool, GatewayError> {
        let request = self
            .client
            .get(&resource.api, resource.namespace.as_deref(), &resource.name);
        Ok(self
            .guard(&resource.api.kind, &resource.name, request)
            .await?
            .is_some())
    }

    pub async fn list_with_labels<K: Object>(
        &self,
        namespace: Option<&str>,
        labels: &Labels,
    ) -> Result<Vec<K>, GatewayError> {
        let api = ApiResource::erase::<K>(&());
        let request = self.client.list(&api, scope::<K>(namespace), labels);
        self.guard(&api.kind, "list", request)
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    pub async fn list<K: Object>(&self, namespace: Option<&str>) -> Result<Vec<K>, GatewayError> {
        self.list_with_labels(namespace, &Labels::new()).await
    }

    pub async fn pod_logs(&self, namespace: &str, pod: &str) -> Result<String, GatewayError> {
        self.guard("Pod", pod, self.client.pod_logs(namespace, pod)).await
    }
}

/// Build a label map from string pairs
pub fn labels<I, K, V>(pairs: I) -> Labels
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
