//! Package-manager (OLM) objects

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Declares intent to install an operator package from a catalog
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "Subscription",
    plural = "subscriptions",
    status = "SubscriptionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    /// Package name
    pub name: String,
    pub channel: String,
    /// Catalog source name
    pub source: String,
    pub source_namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_plan_approval: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SubscriptionStatus {
    /// Bundle the package manager is currently reconciling
    #[serde(rename = "currentCSV", default, skip_serializing_if = "Option::is_none")]
    pub current_csv: Option<String>,
    /// Bundle that was actually installed
    #[serde(rename = "installedCSV", default, skip_serializing_if = "Option::is_none")]
    pub installed_csv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Subscription {
    /// Current bundle name, `None` while unset or empty
    pub fn current_csv(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.current_csv.as_deref())
            .filter(|csv| !csv.is_empty())
    }

    /// Installed bundle name, falling back to the current one
    pub fn installed_csv(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.installed_csv.as_deref())
            .filter(|csv| !csv.is_empty())
            .or_else(|| self.current_csv())
    }
}

/// Selects the namespaces an operator watches
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1",
    kind = "OperatorGroup",
    plural = "operatorgroups",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_namespaces: Vec<String>,
}

/// Catalog of operator bundles served over gRPC
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "CatalogSource",
    plural = "catalogsources",
    status = "CatalogSourceStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceSpec {
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_state: Option<ConnectionState>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    #[serde(default)]
    pub last_observed_state: String,
}

impl CatalogSource {
    /// Last observed gRPC connection state, e.g. "READY"
    pub fn connection_state(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.connection_state.as_ref())
            .map(|c| c.last_observed_state.as_str())
            .filter(|state| !state.is_empty())
    }
}

/// An installed operator bundle version
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "operators.coreos.com",
    version = "v1alpha1",
    kind = "ClusterServiceVersion",
    plural = "clusterserviceversions",
    shortname = "csv",
    status = "ClusterServiceVersionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ClusterServiceVersionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_status_field_names() {
        let sub: Subscription = serde_json::from_value(serde_json::json!({
            "apiVersion": "operators.coreos.com/v1alpha1",
            "kind": "Subscription",
            "metadata": {"name": "kogito-operator", "namespace": "s1"},
            "spec": {
                "name": "kogito-operator",
                "channel": "alpha",
                "source": "community-operators",
                "sourceNamespace": "openshift-marketplace"
            },
            "status": {"currentCSV": "kogito.v2", "installedCSV": "kogito.v1"}
        }))
        .unwrap();

        assert_eq!(sub.current_csv(), Some("kogito.v2"));
        assert_eq!(sub.installed_csv(), Some("kogito.v1"));
        assert_eq!(sub.spec.source_namespace, "openshift-marketplace");
    }

    #[test]
    fn test_empty_current_csv_is_unset() {
        let mut sub = Subscription::new("kogito-operator", SubscriptionSpec::default());
        assert_eq!(sub.current_csv(), None);

        sub.status = Some(SubscriptionStatus {
            current_csv: Some(String::new()),
            ..Default::default()
        });
        assert_eq!(sub.current_csv(), None);
        assert_eq!(sub.installed_csv(), None);
    }

    #[test]
    fn test_catalog_connection_state() {
        let mut catalog = CatalogSource::new("bdd-tests-kogito-catalog", CatalogSourceSpec::default());
        assert_eq!(catalog.connection_state(), None);

        catalog.status = Some(CatalogSourceStatus {
            connection_state: Some(ConnectionState {
                last_observed_state: "READY".to_string(),
            }),
        });
        assert_eq!(catalog.connection_state(), Some("READY"));
    }
}
