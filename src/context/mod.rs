//! Per-scenario state and the run-wide services it borrows
//!
//! [`Services`] is built once per run: cluster gateway, clone cache, image
//! resolver, operator lifecycle, HTTP probe and the base commands for
//! external tools. Each scenario gets a [`ScenarioContext`] holding its
//! namespace, workspace and everything it created, so teardown can undo it.
//!
//! Step executors change the context only through its scoped helpers
//! (`record_resource`, `on_teardown`, `override_image`...), never by
//! reaching into fields.
//!
//! # Example
//!
//! ```ignore
//! use kogito_bdd::context::{ScenarioContext, Services};
//!
//! let services = Arc::new(Services::connect(RunConfig::default()).await?);
//! let mut ctx = ScenarioContext::new(services, "Deploy quarkus runtime", ["smoke".to_string()]);
//! ctx.setup().await?;
//! ctx.deploy_runtime("example", Runtime::Quarkus, &RuntimeOptions::default()).await?;
//! ctx.wait_runtime_pods("example", 1, Duration::from_secs(60)).await?;
//! let report = ctx.teardown(false).await;
//! ```

mod assertions;
mod operators;
mod sources;
mod teardown;
mod tracking;
mod workload;

pub use sources::{EXAMPLE_LIBRARY, GENERATED_PROJECTS_DIR};
pub use teardown::{TeardownIssue, TeardownReport, TeardownStage};
pub use tracking::CleanupFuture;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::command::{Command, CommandError};
use crate::config::RunConfig;
use crate::gateway::{labels, ClusterClient, Gateway, GatewayError, KubeClient, ResourceRef};
use crate::image::{ImageError, ImageRef, ImageResolver, ImageRole};
use crate::olm::{OlmError, OperatorCatalog, OperatorLifecycle, SubscriptionId, TEST_RESOURCE_LABEL};
use crate::source::{CloneError, Cloner, GitCli, SourceStore};
use crate::steps::FailureKind;
use crate::wait::ConditionError;
use crate::workload::{HttpProbe, ReqwestProbe};

/// Timeout of a single HTTP probe request
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest namespace name the platform accepts
const MAX_NAMESPACE_LEN: usize = 63;
const NAMESPACE_SUFFIX_LEN: usize = 8;

/// Errors from scenario operations
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Failed to create namespace: {0}")]
    Namespace(String),

    #[error("workspace {path}: {reason}")]
    Workspace { path: PathBuf, reason: String },

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Olm(#[from] OlmError),

    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Wait(#[from] ConditionError),

    /// A step needs a tree or artifact an earlier step should have produced
    #[error("{0}")]
    MissingSource(String),

    #[error("Failed to create HTTP probe: {0}")]
    Probe(String),
}

impl ContextError {
    pub(crate) fn workspace(path: &Path, err: impl fmt::Display) -> Self {
        Self::Workspace {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Failure category for reports
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Image(_) | Self::MissingSource(_) | Self::Probe(_) => FailureKind::Configuration,
            Self::Gateway(GatewayError::Cancelled(_)) => FailureKind::Cancelled,
            Self::Namespace(_) | Self::Workspace { .. } | Self::Gateway(_) => FailureKind::Platform,
            Self::Olm(OlmError::Gateway(_)) => FailureKind::Platform,
            Self::Olm(OlmError::Wait(e)) | Self::Wait(e) => FailureKind::of_wait(e),
            Self::Olm(OlmError::UnknownDependency(_)) => FailureKind::Configuration,
            Self::Clone(CloneError::Cancelled { .. }) => FailureKind::Cancelled,
            Self::Clone(CloneError::Workspace { .. }) => FailureKind::Platform,
            Self::Clone(_) => FailureKind::Subprocess,
            Self::Command(e) if e.is_cancelled() => FailureKind::Cancelled,
            Self::Command(_) => FailureKind::Subprocess,
        }
    }
}

enum RunDir {
    Temp(TempDir),
    Fixed(PathBuf),
}

impl RunDir {
    fn path(&self) -> &Path {
        match self {
            RunDir::Temp(dir) => dir.path(),
            RunDir::Fixed(path) => path,
        }
    }
}

/// Run-wide handles shared by every scenario
pub struct Services {
    config: RunConfig,
    gateway: Gateway,
    step_gateway: Gateway,
    sources: SourceStore,
    images: ImageResolver,
    olm: OperatorLifecycle,
    probe: Arc<dyn HttpProbe>,
    maven: Command,
    oc: Command,
    run_dir: RunDir,
    cancel: CancellationToken,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("run_dir", &self.run_dir.path())
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Build services over `client`
    ///
    /// Creates the run directory (`config.work_dir`, or a temporary one
    /// removed when the services are dropped).
    pub fn new(config: RunConfig, client: Arc<dyn ClusterClient>) -> Result<Self, ContextError> {
        let run_dir = match &config.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| ContextError::workspace(dir, e))?;
                RunDir::Fixed(dir.clone())
            }
            None => RunDir::Temp(
                tempfile::Builder::new()
                    .prefix("kogito-bdd-")
                    .tempdir()
                    .map_err(|e| ContextError::workspace(&std::env::temp_dir(), e))?,
            ),
        };

        let cancel = CancellationToken::new();
        let gateway = Gateway::new(client);
        let git = Command::git()
            .with_deadline(config.timeouts.clone)
            .cancel_on(cancel.clone());
        let probe = ReqwestProbe::new(PROBE_REQUEST_TIMEOUT).map_err(ContextError::Probe)?;

        Ok(Self {
            sources: SourceStore::new(Arc::new(GitCli::with_command(git)), run_dir.path().join("sources")),
            images: ImageResolver::from_config(&config),
            olm: OperatorLifecycle::new(gateway.clone(), &config).with_cancel(cancel.clone()),
            probe: Arc::new(probe),
            maven: tool(Command::new("mvn").arg("-B"), &config, &cancel),
            oc: tool(Command::oc(), &config, &cancel),
            step_gateway: gateway.with_cancel(cancel.clone()),
            gateway,
            run_dir,
            cancel,
            config,
        })
    }

    /// Connect to the cluster from the local kubeconfig
    pub async fn connect(config: RunConfig) -> Result<Self, ContextError> {
        let client = KubeClient::try_default().await?;
        Self::new(config, Arc::new(client))
    }

    /// Clone sources with `cloner` instead of the git CLI
    #[must_use]
    pub fn with_cloner(mut self, cloner: Arc<dyn Cloner>) -> Self {
        self.sources = SourceStore::new(cloner, self.run_dir.path().join("sources"));
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HttpProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Base command for maven builds; the run deadline and cancellation are added
    #[must_use]
    pub fn with_maven(mut self, maven: Command) -> Self {
        self.maven = tool(maven, &self.config, &self.cancel);
        self
    }

    /// Base command for platform CLI uploads
    #[must_use]
    pub fn with_oc(mut self, oc: Command) -> Self {
        self.oc = tool(oc, &self.config, &self.cancel);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Gateway that finishes every request, for teardown and diagnostics
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Gateway whose requests are abandoned once the run is cancelled
    pub fn step_gateway(&self) -> &Gateway {
        &self.step_gateway
    }

    pub fn sources(&self) -> &SourceStore {
        &self.sources
    }

    pub fn images(&self) -> &ImageResolver {
        &self.images
    }

    pub fn olm(&self) -> &OperatorLifecycle {
        &self.olm
    }

    pub fn probe(&self) -> &dyn HttpProbe {
        self.probe.as_ref()
    }

    /// Maven in `dir`
    pub fn maven(&self, dir: &Path) -> Command {
        self.maven.in_dir(dir)
    }

    pub fn oc(&self) -> Command {
        self.oc.clone()
    }

    pub fn run_dir(&self) -> &Path {
        self.run_dir.path()
    }

    /// Cancelling this token aborts every wait, clone and subprocess of the run
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

fn tool(base: Command, config: &RunConfig, cancel: &CancellationToken) -> Command {
    base.with_deadline(config.timeouts.command)
        .with_retry(config.command_retries)
        .cancel_on(cancel.clone())
}

/// Where the operator under test was installed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OperatorInstall {
    pub namespace: String,
    pub catalog: OperatorCatalog,
}

/// State owned by one scenario
pub struct ScenarioContext {
    services: Arc<Services>,
    scenario: String,
    namespace: String,
    workspace: PathBuf,
    tags: BTreeSet<String>,
    source_trees: BTreeMap<String, PathBuf>,
    image_overrides: BTreeMap<ImageRole, ImageRef>,
    installed_operators: Vec<SubscriptionId>,
    applied_resources: Vec<ResourceRef>,
    references: BTreeMap<String, String>,
    cleanups: Vec<tracking::Cleanup>,
    kogito_operator: Option<OperatorInstall>,
    namespace_created: bool,
}

impl fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("scenario", &self.scenario)
            .field("namespace", &self.namespace)
            .field("applied_resources", &self.applied_resources.len())
            .field("installed_operators", &self.installed_operators.len())
            .finish_non_exhaustive()
    }
}

impl ScenarioContext {
    /// Context for `scenario`; touches nothing until [`setup`](Self::setup)
    pub fn new(services: Arc<Services>, scenario: &str, tags: impl IntoIterator<Item = String>) -> Self {
        let namespace = namespace_for(scenario);
        let workspace = services.run_dir().join("scenarios").join(&namespace);
        Self {
            services,
            scenario: scenario.to_string(),
            namespace,
            workspace,
            tags: tags
                .into_iter()
                .map(|t| t.trim_start_matches('@').to_string())
                .collect(),
            source_trees: BTreeMap::new(),
            image_overrides: BTreeMap::new(),
            installed_operators: Vec::new(),
            applied_resources: Vec::new(),
            references: BTreeMap::new(),
            cleanups: Vec::new(),
            kogito_operator: None,
            namespace_created: false,
        }
    }

    /// Check image provenance, then create the workspace and the namespace
    #[instrument(skip(self), fields(scenario = %self.scenario, namespace = %self.namespace))]
    pub async fn setup(&mut self) -> Result<(), ContextError> {
        self.services
            .images()
            .validate(&self.tags, &self.image_overrides)?;

        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| ContextError::workspace(&self.workspace, e))?;

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(self.namespace.clone()),
                labels: Some(labels([(TEST_RESOURCE_LABEL, "")])),
                ..Default::default()
            },
            ..Default::default()
        };
        self.services
            .gateway()
            .create_if_absent(&namespace)
            .await
            .map_err(|e| ContextError::Namespace(e.to_string()))?;
        self.namespace_created = true;

        info!(namespace = %self.namespace, "Created scenario namespace");
        Ok(())
    }
}

/// DNS-1123 label from a scenario name plus a random suffix
pub fn namespace_for(scenario: &str) -> String {
    let mut base = String::new();
    for c in scenario.chars() {
        if c.is_ascii_alphanumeric() {
            base.push(c.to_ascii_lowercase());
        } else if !base.ends_with('-') && !base.is_empty() {
            base.push('-');
        }
    }
    base.truncate(MAX_NAMESPACE_LEN - NAMESPACE_SUFFIX_LEN - 1);
    let base = base.trim_end_matches('-');
    let base = if base.is_empty() { "scenario" } else { base };

    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{base}-{}", &suffix[..NAMESPACE_SUFFIX_LEN])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gateway::{MemoryCluster, Verb};

    pub(crate) fn services(cluster: Arc<MemoryCluster>) -> Arc<Services> {
        Arc::new(Services::new(RunConfig::default().poll_interval(Duration::from_secs(1)), cluster).unwrap())
    }

    #[test]
    fn test_namespace_is_dns_label() {
        let ns = namespace_for("Deploy Quarkus runtime (native)!");
        assert!(ns.starts_with("deploy-quarkus-runtime-native-"));
        assert_eq!(ns.len(), "deploy-quarkus-runtime-native-".len() + 8);
        assert!(ns.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn test_namespace_is_bounded_and_unique() {
        let long = "x".repeat(200);
        let a = namespace_for(&long);
        let b = namespace_for(&long);
        assert!(a.len() <= MAX_NAMESPACE_LEN);
        assert_ne!(a, b);
        assert!(namespace_for("???").starts_with("scenario-"));
    }

    #[tokio::test]
    async fn test_setup_creates_labelled_namespace_and_workspace() {
        let cluster = Arc::new(MemoryCluster::new());
        let mut ctx = ScenarioContext::new(services(cluster.clone()), "Setup works", ["@smoke".to_string()]);
        ctx.setup().await.unwrap();

        let ns: Namespace = cluster.get(None, ctx.namespace()).unwrap();
        assert!(ns.metadata.labels.unwrap().contains_key(TEST_RESOURCE_LABEL));
        assert!(ctx.workspace().is_dir());
        assert!(ctx.has_tag("smoke"));
    }

    #[tokio::test]
    async fn test_setup_fails_on_unresolvable_image_before_cluster_calls() {
        let cluster = Arc::new(MemoryCluster::new());
        let config = RunConfig::default().without_image(ImageRole::Builder);
        let services = Arc::new(Services::new(config, cluster.clone()).unwrap());
        let mut ctx = ScenarioContext::new(services, "No builder", []);

        let err = ctx.setup().await.unwrap_err();
        assert!(matches!(err, ContextError::Image(ImageError::Unresolved(ImageRole::Builder))));
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert!(cluster.calls_matching(Verb::Create, "Namespace").is_empty());
    }

    #[test]
    fn test_error_kinds() {
        let gateway = ContextError::Gateway(GatewayError::NotFound("x".into()));
        assert_eq!(gateway.kind(), FailureKind::Platform);
        let abandoned = ContextError::Gateway(GatewayError::Cancelled("KogitoRuntime example".into()));
        assert_eq!(abandoned.kind(), FailureKind::Cancelled);

        let cancelled = ContextError::Command(CommandError::Cancelled { program: "mvn".into() });
        assert_eq!(cancelled.kind(), FailureKind::Cancelled);

        let failed = ContextError::Wait(ConditionError::Failed {
            description: "build".into(),
            reason: "failed".into(),
        });
        assert_eq!(failed.kind(), FailureKind::Assertion);
    }
}
