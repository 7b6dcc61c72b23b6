//! Workload resources reconciled by the Kogito operator

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Condition;

/// Condition type set once a service's deployment is up
pub const CONDITION_DEPLOYED: &str = "Deployed";
/// Condition type set once an infra resource is bound
pub const CONDITION_CONFIGURED: &str = "Configured";
pub const CONDITION_FAILED: &str = "Failed";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Sorted env list from a key/value map
pub fn env_vars(env: &BTreeMap<String, String>) -> Vec<EnvVar> {
    env.iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: value.clone(),
        })
        .collect()
}

/// Status shared by runtimes and supporting services
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KogitoServiceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(rename = "externalURI", default, skip_serializing_if = "Option::is_none")]
    pub external_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A deployed Kogito application
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "app.kiegroup.org",
    version = "v1beta1",
    kind = "KogitoRuntime",
    plural = "kogitoruntimes",
    status = "KogitoServiceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KogitoRuntimeSpec {
    /// "quarkus" or "springboot"
    pub runtime: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
    /// Names of `KogitoInfra` objects to bind
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infra: Vec<String>,
}

/// A Kogito service provided by the operator itself (data index, jobs...)
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "app.kiegroup.org",
    version = "v1beta1",
    kind = "KogitoSupportingService",
    plural = "kogitosupportingservices",
    status = "KogitoServiceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KogitoSupportingServiceSpec {
    pub service_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infra: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_dir: Option<String>,
}

/// How a `KogitoBuild` obtains its input
pub const BUILD_TYPE_REMOTE_SOURCE: &str = "RemoteSource";
pub const BUILD_TYPE_BINARY: &str = "Binary";

/// An image build run on the cluster
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "app.kiegroup.org",
    version = "v1beta1",
    kind = "KogitoBuild",
    plural = "kogitobuilds",
    status = "KogitoBuildStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KogitoBuildSpec {
    pub r#type: String,
    pub runtime: String,
    #[serde(default)]
    pub native: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_source: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maven_mirror_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KogitoBuildStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub builds: Builds,
}

/// Names of the platform builds spawned for a `KogitoBuild`, by phase
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Builds {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub running: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub complete: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancelled: Vec<String>,
}

impl Builds {
    /// Builds that ended without producing an image
    pub fn unsuccessful(&self) -> Vec<&str> {
        self.failed
            .iter()
            .chain(&self.error)
            .chain(&self.cancelled)
            .map(String::as_str)
            .collect()
    }

    pub fn summary(&self) -> String {
        format!(
            "new={} pending={} running={} complete={} failed={} error={} cancelled={}",
            self.new.len(),
            self.pending.len(),
            self.running.len(),
            self.complete.len(),
            self.failed.len(),
            self.error.len(),
            self.cancelled.len()
        )
    }
}

/// Third-party resource reference bound by a `KogitoInfra`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfraResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Binding between Kogito services and an infrastructure instance
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "app.kiegroup.org",
    version = "v1beta1",
    kind = "KogitoInfra",
    plural = "kogitoinfras",
    status = "KogitoInfraStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct KogitoInfraSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<InfraResource>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KogitoInfraStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_serializes_camel_case_and_skips_empty() {
        let runtime = KogitoRuntime::new(
            "example",
            KogitoRuntimeSpec {
                runtime: "quarkus".to_string(),
                replicas: Some(2),
                env: env_vars(&[("JAVA_OPTS".to_string(), "-Xmx1g".to_string())].into()),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&runtime).unwrap();
        assert_eq!(json["kind"], "KogitoRuntime");
        assert_eq!(json["apiVersion"], "app.kiegroup.org/v1beta1");
        assert_eq!(json["spec"]["replicas"], 2);
        assert_eq!(json["spec"]["env"][0]["name"], "JAVA_OPTS");
        assert!(json["spec"].get("infra").is_none());
        assert!(json["spec"].get("image").is_none());
    }

    #[test]
    fn test_build_status_decodes_phases() {
        let status: KogitoBuildStatus = serde_json::from_value(serde_json::json!({
            "builds": {"complete": ["example-builder-1"], "failed": ["example-builder-0"]}
        }))
        .unwrap();
        assert_eq!(status.builds.complete, vec!["example-builder-1"]);
        assert_eq!(status.builds.unsuccessful(), vec!["example-builder-0"]);
        assert!(status.builds.summary().contains("complete=1"));
    }

    #[test]
    fn test_service_status_external_uri_field_name() {
        let status: KogitoServiceStatus = serde_json::from_value(serde_json::json!({
            "externalURI": "http://example-ns.apps.cluster"
        }))
        .unwrap();
        assert_eq!(status.external_uri.as_deref(), Some("http://example-ns.apps.cluster"));
    }
}
