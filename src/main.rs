//! kogito-bdd CLI
//!
//! Runs feature files against the cluster of the current kubeconfig.

use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use kogito_bdd::config::{parse_tag_mapping, Platform, RunConfig, Timeouts};
use kogito_bdd::context::Services;
use kogito_bdd::feature::{self, ScenarioFilter};
use kogito_bdd::image::{ImageRole, TagMapping};
use kogito_bdd::runner::{ScenarioRunner, ScenarioStatus};
use kogito_bdd::steps::default_registry;
use kogito_bdd::telemetry::init_logging;

/// Behaviour-driven end-to-end tests for the Kogito operator
#[derive(Parser, Debug)]
#[command(name = "kogito-bdd", version, about, long_about = None)]
struct Cli {
    /// Feature file, or directory searched for *.feature files
    #[arg(default_value = "features")]
    features: PathBuf,

    /// Print the selected scenarios and exit
    #[arg(long)]
    list: bool,

    /// Repository of the operator image
    #[arg(long, env = "OPERATOR_IMAGE_NAME")]
    operator_image_name: Option<String>,

    #[arg(long, env = "OPERATOR_IMAGE_TAG")]
    operator_image_tag: Option<String>,

    /// Bundle catalog image; installs the operator from a test catalog
    #[arg(long, env = "OPERATOR_CATALOG_IMAGE")]
    operator_catalog_image: Option<String>,

    #[arg(long, env = "OPERATOR_CHANNEL")]
    operator_channel: Option<String>,

    /// Package manager namespace (cluster-wide subscriptions)
    #[arg(long, env = "OLM_NAMESPACE")]
    olm_namespace: Option<String>,

    /// Namespace holding catalog sources
    #[arg(long, env = "MARKETPLACE_NAMESPACE")]
    marketplace_namespace: Option<String>,

    /// openshift or kubernetes
    #[arg(long, env = "PLATFORM")]
    platform: Option<Platform>,

    /// Operator readiness deadline, minutes
    #[arg(long, env = "DEFAULT_TIMEOUT_OPERATOR")]
    timeout_operator: Option<u64>,

    /// Custom catalog readiness deadline, minutes
    #[arg(long, env = "DEFAULT_TIMEOUT_CATALOG")]
    timeout_catalog: Option<u64>,

    /// Slow dependency operators deadline, minutes
    #[arg(long, env = "DEFAULT_TIMEOUT_DEPENDENCY_OPERATOR")]
    timeout_dependency_operator: Option<u64>,

    /// Remote build deadline, minutes
    #[arg(long, env = "DEFAULT_TIMEOUT_BUILD")]
    timeout_build: Option<u64>,

    /// Local subprocess deadline, minutes
    #[arg(long, env = "DEFAULT_TIMEOUT_COMMAND")]
    timeout_command: Option<u64>,

    /// Clone deadline, minutes
    #[arg(long, env = "DEFAULT_TIMEOUT_CLONE")]
    timeout_clone: Option<u64>,

    /// Seconds between polls of eventual conditions
    #[arg(long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Attempts for maven and oc invocations
    #[arg(long, env = "COMMAND_RETRIES")]
    command_retries: Option<u32>,

    #[arg(long, env = "EXAMPLE_LIBRARY_URI")]
    example_library_uri: Option<String>,

    #[arg(long, env = "EXAMPLE_LIBRARY_REF")]
    example_library_ref: Option<String>,

    /// Default image for a role, as `role=image` (repeatable)
    #[arg(long = "image", env = "IMAGES", value_delimiter = ',', value_parser = parse_role_image)]
    images: Vec<(ImageRole, String)>,

    /// Image selected by a scenario tag, as `tag:role=image` (repeatable)
    #[arg(long = "tag-mapping", env = "TAG_MAPPINGS", value_delimiter = ',')]
    tag_mappings: Vec<String>,

    #[arg(long, env = "MAVEN_MIRROR_URL")]
    maven_mirror_url: Option<String>,

    /// Tag expression, e.g. `@smoke,@nightly` or `~@slow` (repeatable, all must hold)
    #[arg(long = "tags", env = "TAGS")]
    tag_filters: Vec<String>,

    /// Regular expression on scenario names (repeatable, any may match)
    #[arg(long = "name", env = "SCENARIO_NAME")]
    name_filters: Vec<String>,

    /// Leave the namespace of a failed scenario for debugging
    #[arg(long, env = "KEEP_NAMESPACE_ON_FAILURE")]
    keep_namespace_on_failure: bool,

    /// Skip collecting events and pod logs of failed scenarios
    #[arg(long, env = "NO_DIAGNOSTICS")]
    no_diagnostics: bool,

    /// Run directory for clones and scenario workspaces (default: temporary)
    #[arg(long, env = "WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// JSON lines result report
    #[arg(long, env = "REPORT_PATH")]
    report_path: Option<PathBuf>,
}

fn parse_role_image(input: &str) -> Result<(ImageRole, String), String> {
    let (role, image) = input
        .split_once('=')
        .ok_or_else(|| format!("expected role=image, got '{input}'"))?;
    let role = role.trim().parse::<ImageRole>().map_err(|e| e.to_string())?;
    Ok((role, image.trim().to_string()))
}

fn minutes(value: Option<u64>, default: Duration) -> Duration {
    value.map(|m| Duration::from_secs(m * 60)).unwrap_or(default)
}

impl Cli {
    fn config(&self) -> Result<RunConfig, String> {
        let defaults = RunConfig::default();
        let mut config = defaults.clone();

        if let Some(name) = &self.operator_image_name {
            config = config.operator_image_name(name);
        }
        if let Some(tag) = &self.operator_image_tag {
            config = config.operator_image_tag(tag);
        }
        if let Some(image) = &self.operator_catalog_image {
            config = config.operator_catalog_image(image);
        }
        if let Some(channel) = &self.operator_channel {
            config = config.operator_channel(channel);
        }
        if let Some(namespace) = &self.olm_namespace {
            config = config.olm_namespace(namespace);
        }
        if let Some(namespace) = &self.marketplace_namespace {
            config = config.marketplace_namespace(namespace);
        }
        if let Some(platform) = self.platform {
            config = config.platform(platform);
        }

        config = config.timeouts(Timeouts {
            operator: minutes(self.timeout_operator, defaults.timeouts.operator),
            catalog: minutes(self.timeout_catalog, defaults.timeouts.catalog),
            dependency_operator: minutes(self.timeout_dependency_operator, defaults.timeouts.dependency_operator),
            build: minutes(self.timeout_build, defaults.timeouts.build),
            command: minutes(self.timeout_command, defaults.timeouts.command),
            clone: minutes(self.timeout_clone, defaults.timeouts.clone),
        });
        if let Some(secs) = self.poll_interval {
            config = config.poll_interval(Duration::from_secs(secs.max(1)));
        }
        if let Some(attempts) = self.command_retries {
            config = config.command_retries(attempts);
        }

        config = config.example_library(
            self.example_library_uri
                .clone()
                .unwrap_or(defaults.example_library_uri),
            self.example_library_ref
                .clone()
                .unwrap_or(defaults.example_library_ref),
        );

        for (role, image) in &self.images {
            config = config.image(*role, image);
        }

        let mut mappings: BTreeMap<String, TagMapping> = BTreeMap::new();
        for input in &self.tag_mappings {
            let (tag, role, image) = parse_tag_mapping(input).map_err(|e| e.to_string())?;
            let mapping = mappings
                .remove(&tag)
                .unwrap_or_else(|| TagMapping::new(tag.clone()));
            mappings.insert(tag, mapping.image(role, image));
        }
        for mapping in mappings.into_values() {
            config = config.tag_mapping(mapping);
        }

        if let Some(url) = &self.maven_mirror_url {
            config = config.maven_mirror_url(url);
        }
        for filter in &self.tag_filters {
            config = config.tag_filter(filter);
        }
        for filter in &self.name_filters {
            config = config.name_filter(filter);
        }

        config = config
            .keep_namespace_on_failure(self.keep_namespace_on_failure)
            .collect_diagnostics(!self.no_diagnostics);
        if let Some(dir) = &self.work_dir {
            config = config.work_dir(dir);
        }
        if let Some(path) = &self.report_path {
            config = config.report_path(path);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    let features = match feature::load(&cli.features) {
        Ok(features) => features,
        Err(e) => {
            error!(error = %e, "Failed to load features");
            return ExitCode::from(2);
        }
    };

    if cli.list {
        return match ScenarioFilter::from_config(&config) {
            Ok(filter) => {
                for scenario in filter.select(&features) {
                    println!("{}  {}", scenario.id(), scenario.name);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Invalid filter");
                ExitCode::from(2)
            }
        };
    }

    let registry = match default_registry() {
        Ok(registry) => registry,
        Err(e) => {
            error!(error = %e, "Invalid step registry");
            return ExitCode::from(2);
        }
    };

    let services = match Services::connect(config).await {
        Ok(services) => Arc::new(services),
        Err(e) => {
            error!(error = %e, "Failed to connect to the cluster");
            return ExitCode::from(2);
        }
    };

    let cancel = services.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the run");
            cancel.cancel();
        }
    });

    let runner = ScenarioRunner::new(services, registry);
    let summary = match runner.run(&features).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Run aborted");
            return ExitCode::from(2);
        }
    };

    for result in summary.results.iter().filter(|r| r.status == ScenarioStatus::Failed) {
        if let Some(diagnostics) = &result.diagnostics {
            eprintln!("{diagnostics}");
        }
    }
    println!("{summary}");

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
