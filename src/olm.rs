//! Operator installation through the package manager
//!
//! Operators are installed by subscription. Readiness is read from the
//! subscription's current bundle (CSV) and the single deployment the package
//! manager labels as owned by it. Every cluster-wide object the harness
//! creates carries [`TEST_RESOURCE_LABEL`] so a run can find and remove what
//! it left behind.
//!
//! # Example
//!
//! ```ignore
//! let olm = OperatorLifecycle::new(gateway, &config);
//! let catalog = OperatorCatalog::community(&config.marketplace_namespace);
//!
//! let id = olm.install_namespaced("s1", "kogito-operator", "alpha", &catalog).await?;
//! olm.wait_running("s1", "kogito-operator", &catalog, Duration::from_secs(300)).await?;
//! olm.uninstall(&id).await?;
//! ```

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{Platform, RunConfig};
use crate::crd::{
    CatalogSource, CatalogSourceSpec, ClusterServiceVersion, OperatorGroup, OperatorGroupSpec,
    Subscription, SubscriptionSpec,
};
use crate::gateway::{labels, Gateway, GatewayError, Labels};
use crate::wait::{wait_until, ConditionError, PollError};

/// Label (empty value) on every cluster-wide object created by the harness
pub const TEST_RESOURCE_LABEL: &str = "kogito-operator-bdd-tests";

/// Package of the operator under test
pub const OPERATOR_UNDER_TEST: &str = "kogito-operator";

/// Name of the catalog source used to inject prerelease bundles
pub const TEST_CATALOG_NAME: &str = "bdd-tests-kogito-catalog";

const OLM_OWNER: &str = "olm.owner";
const OLM_OWNER_KIND: &str = "olm.owner.kind";

/// Errors from operator lifecycle operations
#[derive(Debug, thiserror::Error)]
pub enum OlmError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Wait(#[from] ConditionError),

    #[error("unknown dependency operator '{0}' (expected Infinispan, Kafka, Keycloak or MongoDB)")]
    UnknownDependency(String),
}

/// Catalog source an operator is installed from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperatorCatalog {
    pub source: String,
    pub namespace: String,
}

impl OperatorCatalog {
    pub fn new(source: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            namespace: namespace.into(),
        }
    }

    /// Community operators shipped with the platform
    pub fn community(marketplace_namespace: &str) -> Self {
        Self::new("community-operators", marketplace_namespace)
    }

    pub fn operator_hub() -> Self {
        Self::new("operatorhubio-catalog", "olm")
    }

    /// The catalog created by [`OperatorLifecycle::create_test_catalog`]
    pub fn custom(marketplace_namespace: &str) -> Self {
        Self::new(TEST_CATALOG_NAME, marketplace_namespace)
    }
}

impl fmt::Display for OperatorCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.source)
    }
}

/// Identity of an installed subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    pub namespace: String,
    pub package: String,
    pub source: String,
    pub channel: String,
}

impl SubscriptionId {
    pub fn of(subscription: &Subscription) -> Option<Self> {
        Some(Self {
            namespace: subscription.namespace()?,
            package: subscription.spec.name.clone(),
            source: subscription.spec.source.clone(),
            channel: subscription.spec.channel.clone(),
        })
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} ({}, channel {})",
            self.package, self.namespace, self.source, self.channel
        )
    }
}

/// Observed installation state of an operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorStatus {
    NotInstalled,
    /// Subscription exists, current bundle not reported yet
    AwaitingCsv,
    NoDeployment { csv: String },
    /// Owned deployment(s) exist but not exactly one is available
    Deploying { csv: String, available: i32 },
    Running { csv: String },
}

impl OperatorStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "no subscription"),
            Self::AwaitingCsv => write!(f, "subscription has no current CSV yet"),
            Self::NoDeployment { csv } => write!(f, "no deployment owned by {csv}"),
            Self::Deploying { csv, available } => {
                write!(f, "deployment owned by {csv} has {available} available replicas")
            }
            Self::Running { csv } => write!(f, "{csv} running"),
        }
    }
}

/// Result of [`OperatorLifecycle::uninstall`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UninstallOutcome {
    Removed { csv: Option<String> },
    AlreadyAbsent,
}

/// Operators Kogito workloads depend on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyOperator {
    Infinispan,
    Kafka,
    Keycloak,
    MongoDb,
}

impl DependencyOperator {
    pub const ALL: [DependencyOperator; 4] = [
        DependencyOperator::Infinispan,
        DependencyOperator::Kafka,
        DependencyOperator::Keycloak,
        DependencyOperator::MongoDb,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Infinispan => "Infinispan",
            Self::Kafka => "Kafka",
            Self::Keycloak => "Keycloak",
            Self::MongoDb => "MongoDB",
        }
    }

    /// Package name in the community catalog
    pub fn package(&self) -> &'static str {
        match self {
            Self::Infinispan => "infinispan",
            Self::Kafka => "strimzi-kafka-operator",
            Self::Keycloak => "keycloak-operator",
            Self::MongoDb => "mongodb-enterprise",
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Self::Infinispan => "2.1.x",
            Self::Kafka => "stable",
            Self::Keycloak => "alpha",
            Self::MongoDb => "stable",
        }
    }

    /// `(apiVersion, kind)` of the instance a `KogitoInfra` binds to
    pub fn instance_api(&self) -> (&'static str, &'static str) {
        match self {
            Self::Infinispan => ("infinispan.org/v1", "Infinispan"),
            Self::Kafka => ("kafka.strimzi.io/v1beta2", "Kafka"),
            Self::Keycloak => ("keycloak.org/v1alpha1", "Keycloak"),
            Self::MongoDb => ("mongodb.com/v1", "MongoDB"),
        }
    }

    /// Readiness deadline; MongoDB is slower than the rest
    pub fn timeout(&self, config: &RunConfig) -> Duration {
        match self {
            Self::MongoDb => config.timeouts.dependency_operator,
            _ => config.timeouts.operator,
        }
    }
}

impl fmt::Display for DependencyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DependencyOperator {
    type Err = OlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| OlmError::UnknownDependency(s.to_string()))
    }
}

fn test_labels() -> Labels {
    labels([(TEST_RESOURCE_LABEL, "")])
}

/// Installs, observes and removes operators
#[derive(Debug, Clone)]
pub struct OperatorLifecycle {
    gateway: Gateway,
    olm_namespace: String,
    marketplace_namespace: String,
    platform: Platform,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl OperatorLifecycle {
    pub fn new(gateway: Gateway, config: &RunConfig) -> Self {
        Self {
            gateway,
            olm_namespace: config.olm_namespace.clone(),
            marketplace_namespace: config.marketplace_namespace.clone(),
            platform: config.platform,
            poll_interval: config.poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort waits when `token` is cancelled
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn olm_namespace(&self) -> &str {
        &self.olm_namespace
    }

    pub fn marketplace_namespace(&self) -> &str {
        &self.marketplace_namespace
    }

    /// Ensure an operator group targeting `namespace`, then subscribe
    #[instrument(skip(self, catalog), fields(catalog = %catalog))]
    pub async fn install_namespaced(
        &self,
        namespace: &str,
        package: &str,
        channel: &str,
        catalog: &OperatorCatalog,
    ) -> Result<SubscriptionId, OlmError> {
        let group = OperatorGroup {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: OperatorGroupSpec {
                target_namespaces: vec![namespace.to_string()],
            },
        };
        if self.gateway.create_if_absent(&group).await? {
            info!(namespace, "Created operator group");
        }

        self.subscribe(namespace, package, channel, catalog).await
    }

    /// Subscribe in the package manager's namespace, watching all namespaces
    #[instrument(skip(self, catalog), fields(catalog = %catalog))]
    pub async fn install_cluster_wide(
        &self,
        package: &str,
        channel: &str,
        catalog: &OperatorCatalog,
    ) -> Result<SubscriptionId, OlmError> {
        self.subscribe(&self.olm_namespace, package, channel, catalog)
            .await
    }

    async fn subscribe(
        &self,
        namespace: &str,
        package: &str,
        channel: &str,
        catalog: &OperatorCatalog,
    ) -> Result<SubscriptionId, OlmError> {
        let subscription = Subscription {
            metadata: ObjectMeta {
                name: Some(package.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(test_labels()),
                ..Default::default()
            },
            spec: SubscriptionSpec {
                name: package.to_string(),
                channel: channel.to_string(),
                source: catalog.source.clone(),
                source_namespace: catalog.namespace.clone(),
                install_plan_approval: None,
            },
            status: None,
        };

        if self.gateway.create_if_absent(&subscription).await? {
            info!(namespace, package, channel, "Subscribed to operator");
        } else {
            debug!(namespace, package, "Subscription already present");
        }

        Ok(SubscriptionId {
            namespace: namespace.to_string(),
            package: package.to_string(),
            source: catalog.source.clone(),
            channel: channel.to_string(),
        })
    }

    /// Subscription for `package` from `catalog` in `namespace`
    pub async fn subscription(
        &self,
        namespace: &str,
        package: &str,
        catalog: &OperatorCatalog,
    ) -> Result<Option<Subscription>, GatewayError> {
        let subscriptions: Vec<Subscription> = self.gateway.list(Some(namespace)).await?;
        Ok(subscriptions
            .into_iter()
            .find(|s| s.spec.name == package && s.spec.source == catalog.source))
    }

    pub async fn operator_status(
        &self,
        namespace: &str,
        package: &str,
        catalog: &OperatorCatalog,
    ) -> Result<OperatorStatus, GatewayError> {
        let Some(subscription) = self.subscription(namespace, package, catalog).await? else {
            return Ok(OperatorStatus::NotInstalled);
        };
        let Some(csv) = subscription.current_csv().map(str::to_string) else {
            return Ok(OperatorStatus::AwaitingCsv);
        };

        let owned = labels([
            (OLM_OWNER_KIND, "ClusterServiceVersion"),
            (OLM_OWNER, csv.as_str()),
        ]);
        let deployments: Vec<Deployment> = self
            .gateway
            .list_with_labels(Some(namespace), &owned)
            .await?;

        let available: Vec<i32> = deployments
            .iter()
            .map(|d| {
                d.status
                    .as_ref()
                    .and_then(|s| s.available_replicas)
                    .unwrap_or(0)
            })
            .collect();

        Ok(match available.as_slice() {
            [] => OperatorStatus::NoDeployment { csv },
            [n] if *n >= 1 => OperatorStatus::Running { csv },
            several => OperatorStatus::Deploying {
                csv,
                available: several.iter().sum(),
            },
        })
    }

    pub async fn is_running(
        &self,
        namespace: &str,
        package: &str,
        catalog: &OperatorCatalog,
    ) -> Result<bool, GatewayError> {
        Ok(self
            .operator_status(namespace, package, catalog)
            .await?
            .is_running())
    }

    /// Wait until the operator runs
    ///
    /// For the operator under test on OpenShift, every negative check also
    /// deletes operator pods missing the expected pull secret so they get
    /// recreated with it.
    #[instrument(skip(self, catalog), fields(catalog = %catalog))]
    pub async fn wait_running(
        &self,
        namespace: &str,
        package: &str,
        catalog: &OperatorCatalog,
        timeout: Duration,
    ) -> Result<(), OlmError> {
        let repair_pull_secrets = package == OPERATOR_UNDER_TEST && self.platform == Platform::OpenShift;

        wait_until(format!("{package} operator running in {namespace}"), timeout, move || async move {
            let status = self.operator_status(namespace, package, catalog).await?;
            if status.is_running() {
                return Ok(true);
            }
            debug!(namespace, package, %status, "Operator not running yet");

            if repair_pull_secrets {
                if let Err(e) = self.recover_pull_secrets(namespace, package).await {
                    warn!(namespace, package, error = %e, "Could not check operator pull secrets");
                }
            }
            Err(PollError::transient(status.to_string()))
        })
        .interval(self.poll_interval)
        .cancel_on(self.cancel.clone())
        .await_condition()
        .await?;
        Ok(())
    }

    /// Delete `package` pods lacking a `<package>-dockercfg*` pull secret
    ///
    /// Returns how many pods were deleted.
    pub async fn recover_pull_secrets(&self, namespace: &str, package: &str) -> Result<usize, GatewayError> {
        let prefix = format!("{package}-dockercfg");
        let pods: Vec<Pod> = self
            .gateway
            .list_with_labels(Some(namespace), &labels([("name", package)]))
            .await?;

        let mut deleted = 0;
        for pod in pods.iter().filter(|p| !has_pull_secret_with_prefix(p, &prefix)) {
            info!(namespace, pod = %pod.name_any(), "Operator pod lacks its image pull secret, deleting it");
            if self.gateway.delete(pod).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete the subscription, then the bundle it installed
    #[instrument(skip(self), fields(subscription = %id))]
    pub async fn uninstall(&self, id: &SubscriptionId) -> Result<UninstallOutcome, OlmError> {
        let catalog = OperatorCatalog::new(id.source.clone(), String::new());
        let Some(subscription) = self.subscription(&id.namespace, &id.package, &catalog).await? else {
            debug!("Subscription already gone");
            return Ok(UninstallOutcome::AlreadyAbsent);
        };

        let csv = subscription.installed_csv().map(str::to_string);
        self.gateway.delete(&subscription).await?;

        if let Some(csv) = &csv {
            if self
                .gateway
                .delete_by_key::<ClusterServiceVersion>(Some(&id.namespace), csv)
                .await?
            {
                debug!(csv = %csv, "Deleted installed CSV");
            }
        }

        info!("Operator uninstalled");
        Ok(UninstallOutcome::Removed { csv })
    }

    /// Install a gRPC catalog source serving `image`; `true` if created
    #[instrument(skip(self))]
    pub async fn create_test_catalog(&self, image: &str) -> Result<bool, OlmError> {
        let catalog = CatalogSource {
            metadata: ObjectMeta {
                name: Some(TEST_CATALOG_NAME.to_string()),
                namespace: Some(self.marketplace_namespace.clone()),
                labels: Some(test_labels()),
                ..Default::default()
            },
            spec: CatalogSourceSpec {
                source_type: "grpc".to_string(),
                image: Some(image.to_string()),
                display_name: Some("Kogito BDD tests catalog".to_string()),
                publisher: None,
            },
            status: None,
        };
        let created = self.gateway.create_if_absent(&catalog).await?;
        if created {
            info!(namespace = %self.marketplace_namespace, "Installed custom catalog");
        }
        Ok(created)
    }

    pub async fn catalog_ready(&self) -> Result<bool, GatewayError> {
        let catalog = self
            .gateway
            .fetch_by_key::<CatalogSource>(Some(&self.marketplace_namespace), TEST_CATALOG_NAME)
            .await?;
        Ok(catalog.as_ref().and_then(CatalogSource::connection_state) == Some("READY"))
    }

    pub async fn wait_catalog_ready(&self, timeout: Duration) -> Result<(), OlmError> {
        wait_until("custom catalog READY", timeout, move || async move {
            Ok(self.catalog_ready().await?)
        })
        .interval(self.poll_interval)
        .cancel_on(self.cancel.clone())
        .await_condition()
        .await?;
        Ok(())
    }

    /// Remove the custom catalog; `false` if it was not there
    pub async fn delete_test_catalog(&self) -> Result<bool, OlmError> {
        let deleted = self
            .gateway
            .delete_by_key::<CatalogSource>(Some(&self.marketplace_namespace), TEST_CATALOG_NAME)
            .await?;
        if deleted {
            info!(namespace = %self.marketplace_namespace, "Deleted custom catalog");
        }
        Ok(deleted)
    }

    /// Harness-created subscriptions in the package manager's namespace
    pub async fn cluster_wide_test_subscriptions(&self) -> Result<Vec<Subscription>, GatewayError> {
        self.gateway
            .list_with_labels(Some(&self.olm_namespace), &test_labels())
            .await
    }

    /// Uninstall every harness-created cluster-wide subscription
    ///
    /// Keeps going past individual failures and returns the first one.
    pub async fn remove_cluster_wide_test_subscriptions(&self) -> Result<Vec<SubscriptionId>, OlmError> {
        let mut removed = Vec::new();
        let mut first_error = None;

        for subscription in self.cluster_wide_test_subscriptions().await? {
            let Some(id) = SubscriptionId::of(&subscription) else {
                continue;
            };
            match self.uninstall(&id).await {
                Ok(_) => removed.push(id),
                Err(e) => {
                    warn!(subscription = %id, error = %e, "Failed to remove cluster-wide subscription");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}

fn has_pull_secret_with_prefix(pod: &Pod, prefix: &str) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.image_pull_secrets.as_ref())
        .is_some_and(|secrets| secrets.iter().any(|s| s.name.starts_with(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterServiceVersionSpec, SubscriptionStatus};
    use crate::gateway::{MemoryCluster, Verb};
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryCluster>, OperatorLifecycle) {
        let cluster = Arc::new(MemoryCluster::new());
        let config = RunConfig::default()
            .olm_namespace("openshift-operators")
            .marketplace_namespace("marketplace")
            .poll_interval(Duration::from_secs(10));
        let olm = OperatorLifecycle::new(Gateway::new(cluster.clone()), &config);
        (cluster, olm)
    }

    fn catalog() -> OperatorCatalog {
        OperatorCatalog::new("community", "marketplace")
    }

    fn owned_deployment(namespace: &str, csv: &str, available: i32) -> Deployment {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "kogito-operator-controller-manager",
                "namespace": namespace,
                "labels": {"olm.owner": csv, "olm.owner.kind": "ClusterServiceVersion"}
            },
            "spec": {"selector": {}, "template": {}},
            "status": {"availableReplicas": available}
        }))
        .unwrap()
    }

    fn set_current_csv(cluster: &MemoryCluster, namespace: &str, csv: &str) {
        cluster.modify::<Subscription>(Some(namespace), "kogito-operator", |s| {
            s.status = Some(SubscriptionStatus {
                current_csv: Some(csv.to_string()),
                installed_csv: Some(csv.to_string()),
                state: None,
            });
        });
    }

    #[tokio::test]
    async fn test_install_namespaced_creates_group_then_subscription() {
        let (cluster, olm) = setup();
        let id = olm
            .install_namespaced("s1", "kogito-operator", "alpha", &catalog())
            .await
            .unwrap();

        let group: OperatorGroup = cluster.get(Some("s1"), "s1").unwrap();
        assert_eq!(group.spec.target_namespaces, vec!["s1"]);

        let sub: Subscription = cluster.get(Some("s1"), "kogito-operator").unwrap();
        assert_eq!(sub.spec.channel, "alpha");
        assert_eq!(sub.spec.source, "community");
        assert_eq!(sub.spec.source_namespace, "marketplace");
        assert!(sub.labels().contains_key(TEST_RESOURCE_LABEL));

        let creates: Vec<String> = cluster
            .mutations()
            .into_iter()
            .filter(|c| c.verb == Verb::Create)
            .map(|c| c.kind)
            .collect();
        assert_eq!(creates, vec!["OperatorGroup", "Subscription"]);
        assert_eq!(id.package, "kogito-operator");
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let (cluster, olm) = setup();
        olm.install_namespaced("s1", "kogito-operator", "alpha", &catalog()).await.unwrap();
        olm.install_namespaced("s1", "kogito-operator", "alpha", &catalog()).await.unwrap();
        assert_eq!(cluster.calls_matching(Verb::Create, "Subscription").len(), 1);
    }

    #[tokio::test]
    async fn test_cluster_wide_install_has_no_operator_group() {
        let (cluster, olm) = setup();
        let id = olm
            .install_cluster_wide("kogito-operator", "alpha", &catalog())
            .await
            .unwrap();
        assert_eq!(id.namespace, "openshift-operators");
        assert!(cluster.calls_matching(Verb::Create, "OperatorGroup").is_empty());
        assert_eq!(olm.cluster_wide_test_subscriptions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_progression() {
        let (cluster, olm) = setup();
        let catalog = catalog();
        let status = || olm.operator_status("s1", "kogito-operator", &catalog);

        assert_eq!(status().await.unwrap(), OperatorStatus::NotInstalled);

        olm.install_namespaced("s1", "kogito-operator", "alpha", &catalog).await.unwrap();
        assert_eq!(status().await.unwrap(), OperatorStatus::AwaitingCsv);

        set_current_csv(&cluster, "s1", "kogito.v2");
        assert_eq!(
            status().await.unwrap(),
            OperatorStatus::NoDeployment { csv: "kogito.v2".into() }
        );

        cluster.insert(&owned_deployment("s1", "kogito.v2", 0));
        assert_eq!(
            status().await.unwrap(),
            OperatorStatus::Deploying { csv: "kogito.v2".into(), available: 0 }
        );

        cluster.insert(&owned_deployment("s1", "kogito.v2", 1));
        assert!(status().await.unwrap().is_running());
    }

    #[tokio::test]
    async fn test_deployment_of_older_csv_does_not_count() {
        let (cluster, olm) = setup();
        olm.install_namespaced("s1", "kogito-operator", "alpha", &catalog()).await.unwrap();
        set_current_csv(&cluster, "s1", "kogito.v2");
        cluster.insert(&owned_deployment("s1", "kogito.v1", 1));

        assert!(!olm.is_running("s1", "kogito-operator", &catalog()).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_running_times_out_while_csv_unset() {
        let (_cluster, olm) = setup();
        olm.install_namespaced("s1", "kogito-operator", "alpha", &catalog()).await.unwrap();

        let err = olm
            .wait_running("s1", "kogito-operator", &catalog(), Duration::from_secs(60))
            .await
            .unwrap_err();
        match err {
            OlmError::Wait(ConditionError::Timeout(wait)) => {
                assert!(wait.last_state.contains("no current CSV"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_running_treats_transport_errors_as_transient() {
        let (cluster, olm) = setup();
        olm.install_namespaced("s1", "kogito-operator", "alpha", &catalog()).await.unwrap();
        set_current_csv(&cluster, "s1", "kogito.v2");
        cluster.insert(&owned_deployment("s1", "kogito.v2", 1));
        cluster.fail_next(
            Verb::List,
            "Subscription",
            GatewayError::Transport {
                what: "list subscriptions".into(),
                message: "connection reset".into(),
            },
        );

        olm.wait_running("s1", "kogito-operator", &catalog(), Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_uninstall_removes_subscription_and_csv() {
        let (cluster, olm) = setup();
        let id = olm
            .install_namespaced("s1", "kogito-operator", "alpha", &catalog())
            .await
            .unwrap();
        set_current_csv(&cluster, "s1", "kogito.v2");
        cluster.insert(&ClusterServiceVersion {
            metadata: ObjectMeta {
                name: Some("kogito.v2".into()),
                namespace: Some("s1".into()),
                ..Default::default()
            },
            spec: ClusterServiceVersionSpec::default(),
            status: None,
        });

        let outcome = olm.uninstall(&id).await.unwrap();
        assert_eq!(outcome, UninstallOutcome::Removed { csv: Some("kogito.v2".into()) });
        assert!(cluster.get::<Subscription>(Some("s1"), "kogito-operator").is_none());
        assert!(cluster.get::<ClusterServiceVersion>(Some("s1"), "kogito.v2").is_none());

        assert_eq!(olm.uninstall(&id).await.unwrap(), UninstallOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_uninstall_tolerates_missing_csv() {
        let (cluster, olm) = setup();
        let id = olm
            .install_namespaced("s1", "kogito-operator", "alpha", &catalog())
            .await
            .unwrap();
        set_current_csv(&cluster, "s1", "kogito.v9");

        assert!(matches!(olm.uninstall(&id).await.unwrap(), UninstallOutcome::Removed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_catalog_lifecycle() {
        let (cluster, olm) = setup();
        assert!(olm.create_test_catalog("quay.io/kiegroup/kogito-catalog:bdd").await.unwrap());
        assert!(!olm.create_test_catalog("quay.io/kiegroup/kogito-catalog:bdd").await.unwrap());
        assert!(!olm.catalog_ready().await.unwrap());

        let stored: CatalogSource = cluster.get(Some("marketplace"), TEST_CATALOG_NAME).unwrap();
        assert_eq!(stored.spec.source_type, "grpc");
        assert!(stored.labels().contains_key(TEST_RESOURCE_LABEL));

        cluster.modify::<CatalogSource>(Some("marketplace"), TEST_CATALOG_NAME, |c| {
            c.status = Some(crate::crd::CatalogSourceStatus {
                connection_state: Some(crate::crd::ConnectionState {
                    last_observed_state: "READY".into(),
                }),
            });
        });
        olm.wait_catalog_ready(Duration::from_secs(30)).await.unwrap();

        assert!(olm.delete_test_catalog().await.unwrap());
        assert!(!olm.delete_test_catalog().await.unwrap());
    }

    #[tokio::test]
    async fn test_cluster_wide_cleanup_only_touches_labelled_subscriptions() {
        let (cluster, olm) = setup();
        olm.install_cluster_wide("kogito-operator", "alpha", &catalog()).await.unwrap();
        cluster.insert(&Subscription {
            metadata: ObjectMeta {
                name: Some("someone-else".into()),
                namespace: Some("openshift-operators".into()),
                ..Default::default()
            },
            spec: SubscriptionSpec {
                name: "someone-else".into(),
                source: "community".into(),
                ..Default::default()
            },
            status: None,
        });

        let removed = olm.remove_cluster_wide_test_subscriptions().await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].package, "kogito-operator");
        assert!(cluster
            .get::<Subscription>(Some("openshift-operators"), "someone-else")
            .is_some());
    }

    #[test]
    fn test_dependency_operator_parsing() {
        assert_eq!("MongoDB".parse::<DependencyOperator>().unwrap(), DependencyOperator::MongoDb);
        assert_eq!("kafka".parse::<DependencyOperator>().unwrap(), DependencyOperator::Kafka);
        assert!("Redis".parse::<DependencyOperator>().is_err());

        let config = RunConfig::default();
        assert_eq!(DependencyOperator::MongoDb.timeout(&config), config.timeouts.dependency_operator);
        assert_eq!(DependencyOperator::Kafka.timeout(&config), config.timeouts.operator);
    }
}
