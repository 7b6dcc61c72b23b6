//! Scenario runner
//!
//! Drives one scenario at a time through its lifecycle:
//! - Pre-validate every step (phrase, arguments, table) without cluster calls
//! - Set up the context (images, workspace, namespace)
//! - Run steps in order; the first failure skips the rest
//! - Collect diagnostics on failure, then tear down unconditionally
//!
//! Results are streamed as JSON lines to the configured report file and
//! summarised when the run ends.

use serde::{Serialize, Serializer};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::context::{ScenarioContext, Services, TeardownReport};
use crate::diagnostics::Diagnostics;
use crate::feature::{Feature, FeatureError, Scenario, ScenarioFilter, Step};
use crate::steps::{FailureKind, RegistryError, StepError, StepRegistry};

const LINE_WIDTH: usize = 80;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Failed to write report {path}: {reason}")]
    Report { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    /// Not started because the run was cancelled
    Skipped,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScenarioStatus::Passed => "passed",
            ScenarioStatus::Failed => "failed",
            ScenarioStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Outcome of one scenario, one line of the run report
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub name: String,
    pub status: ScenarioStatus,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    pub teardown: TeardownReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Diagnostics>,
}

impl ScenarioResult {
    fn new(scenario: &Scenario, status: ScenarioStatus) -> Self {
        Self {
            scenario_id: scenario.id(),
            name: scenario.name.clone(),
            status,
            duration: Duration::ZERO,
            failing_step: None,
            error_message: None,
            failure_kind: None,
            teardown: TeardownReport::default(),
            diagnostics: None,
        }
    }

    fn fail(&mut self, step: Option<&Step>, err: &StepError) {
        self.status = ScenarioStatus::Failed;
        self.failing_step = step.map(Step::to_string);
        self.error_message = Some(err.to_string());
        self.failure_kind = Some(err.kind());
    }

    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }

    /// Teardown left something behind
    pub fn dirty(&self) -> bool {
        !self.teardown.is_clean()
    }
}

/// Every result of a run plus run-level cleanup problems
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub results: Vec<ScenarioResult>,
    /// Problems removing cluster-wide test objects at run end
    pub cleanup_issues: Vec<String>,
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
}

impl RunSummary {
    fn count(&self, status: ScenarioStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(ScenarioStatus::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(ScenarioStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.count(ScenarioStatus::Skipped)
    }

    /// No scenario failed or was skipped
    ///
    /// Dirty teardowns do not fail a run.
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.skipped() == 0
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = " KOGITO BDD RUN SUMMARY ";
        writeln!(
            f,
            "━━━{title}{}",
            "━".repeat(LINE_WIDTH.saturating_sub(title.len() + 3))
        )?;
        writeln!(
            f,
            "  {} scenarios: {} passed, {} failed, {} skipped ({})",
            self.results.len(),
            self.passed(),
            self.failed(),
            self.skipped(),
            format_duration(self.duration)
        )?;

        let failed: Vec<&ScenarioResult> = self
            .results
            .iter()
            .filter(|r| r.status == ScenarioStatus::Failed)
            .collect();
        if !failed.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Failed:")?;
            for result in failed {
                writeln!(f, "    ✗ {} {}", result.scenario_id, result.name)?;
                if let Some(step) = &result.failing_step {
                    writeln!(f, "        step: {step}")?;
                }
                if let Some(message) = &result.error_message {
                    let kind = result.failure_kind.map(|k| k.as_str()).unwrap_or("error");
                    let first = message.lines().next().unwrap_or_default();
                    writeln!(f, "        {kind}: {first}")?;
                }
            }
        }

        let dirty: Vec<&ScenarioResult> = self.results.iter().filter(|r| r.dirty()).collect();
        if !dirty.is_empty() || !self.cleanup_issues.is_empty() {
            writeln!(f)?;
            writeln!(f, "  Dirty teardown:")?;
            for result in dirty {
                for issue in &result.teardown.issues {
                    writeln!(f, "    ! {} {issue}", result.scenario_id)?;
                }
            }
            for issue in &self.cleanup_issues {
                writeln!(f, "    ! run cleanup: {issue}")?;
            }
        }
        write!(f, "{}", "━".repeat(LINE_WIDTH))
    }
}

/// Result records written one JSON object per line
struct JsonLines {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonLines {
    fn create(path: &Path) -> Result<Self, RunnerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| report_error(path, e))?;
        }
        let file = File::create(path).map_err(|e| report_error(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    fn write(&mut self, result: &ScenarioResult) -> Result<(), RunnerError> {
        serde_json::to_writer(&mut self.out, result).map_err(|e| report_error(&self.path, e))?;
        self.out.write_all(b"\n").map_err(|e| report_error(&self.path, e))?;
        self.out.flush().map_err(|e| report_error(&self.path, e))
    }
}

fn report_error(path: &Path, err: impl fmt::Display) -> RunnerError {
    RunnerError::Report {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Runs scenarios sequentially against one set of services
pub struct ScenarioRunner {
    services: Arc<Services>,
    registry: StepRegistry,
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("services", &self.services)
            .field("registry", &self.registry)
            .finish()
    }
}

impl ScenarioRunner {
    pub fn new(services: Arc<Services>, registry: StepRegistry) -> Self {
        Self { services, registry }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Resolve every step and decode its arguments and table
    ///
    /// Returns the first step that would fail as a configuration error.
    pub fn validate<'s>(&self, scenario: &'s Scenario) -> Result<(), (&'s Step, StepError)> {
        for step in &scenario.steps {
            self.registry
                .check(&step.text, &step.payload)
                .map_err(|e| (step, e))?;
        }
        Ok(())
    }

    /// Run one scenario through setup, steps and teardown
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioResult {
        let started = Instant::now();
        let mut result = ScenarioResult::new(scenario, ScenarioStatus::Passed);

        if let Err((step, err)) = self.validate(scenario) {
            warn!(scenario = %scenario.name, step = %step, error = %err, "Scenario rejected before setup");
            result.fail(Some(step), &err);
            result.duration = started.elapsed();
            return result;
        }

        let mut ctx = ScenarioContext::new(self.services.clone(), &scenario.name, scenario.tags.iter().cloned());
        let span = info_span!("scenario", name = %scenario.name, namespace = %ctx.namespace());
        self.execute(scenario, &mut ctx, &mut result).instrument(span).await;

        result.duration = started.elapsed();
        result
    }

    async fn execute(&self, scenario: &Scenario, ctx: &mut ScenarioContext, result: &mut ScenarioResult) {
        info!("Scenario started");
        let cancel = self.services.cancel_token();

        match ctx.setup().await {
            Err(e) => result.fail(None, &StepError::from(e).context("setup")),
            Ok(()) => {
                for step in &scenario.steps {
                    if cancel.is_cancelled() {
                        result.status = ScenarioStatus::Failed;
                        result.failing_step = Some(step.to_string());
                        result.error_message = Some("run cancelled".to_string());
                        result.failure_kind = Some(FailureKind::Cancelled);
                        break;
                    }

                    info!(step = %step, "Step");
                    if let Err(e) = self.registry.dispatch(ctx, &step.text, &step.payload).await {
                        error!(step = %step, kind = %e.kind(), error = %e, "Step failed");
                        result.fail(Some(step), &e);
                        break;
                    }
                }
            }
        }

        let failed = result.status == ScenarioStatus::Failed;
        let config = self.services.config();
        let keep = failed && config.keep_namespace_on_failure;

        if failed && config.collect_diagnostics {
            let mut diagnostics = Diagnostics::collect(self.services.gateway(), ctx.scenario(), ctx.namespace())
                .await
                .kept(keep);
            if let Some(step) = &result.failing_step {
                diagnostics = diagnostics.with_step(step.clone());
            }
            result.diagnostics = Some(diagnostics);
        }

        result.teardown = ctx.teardown(keep).await;
        info!(status = %result.status, dirty = result.dirty(), "Scenario finished");
    }

    /// Run the selected scenarios of `features` and clean up run-wide objects
    pub async fn run(&self, features: &[Feature]) -> Result<RunSummary, RunnerError> {
        let started = Instant::now();
        let filter = ScenarioFilter::from_config(self.services.config())?;
        let selected = filter.select(features);
        self.registry
            .seal(selected.iter().flat_map(|s| s.steps.iter().map(|step| step.text.as_str())))?;
        info!(scenarios = selected.len(), "Run started");

        let mut report = match &self.services.config().report_path {
            Some(path) => Some(JsonLines::create(path)?),
            None => None,
        };

        let cancel = self.services.cancel_token();
        let mut summary = RunSummary::default();
        for scenario in selected {
            let result = if cancel.is_cancelled() {
                ScenarioResult::new(scenario, ScenarioStatus::Skipped)
            } else {
                self.run_scenario(scenario).await
            };
            if let Some(report) = report.as_mut() {
                report.write(&result)?;
            }
            summary.results.push(result);
        }

        summary.cleanup_issues = self.finish().await;
        summary.duration = started.elapsed();
        info!(
            passed = summary.passed(),
            failed = summary.failed(),
            skipped = summary.skipped(),
            "Run finished"
        );
        Ok(summary)
    }

    /// Remove cluster-wide subscriptions and the test catalog
    ///
    /// Both are found by the test label, so objects left by an earlier
    /// interrupted run are removed too.
    pub async fn finish(&self) -> Vec<String> {
        let olm = self.services.olm();
        let mut issues = Vec::new();

        match olm.remove_cluster_wide_test_subscriptions().await {
            Ok(removed) => {
                for id in removed {
                    info!(subscription = %id, "Removed cluster-wide subscription");
                }
            }
            Err(e) => issues.push(format!("cluster-wide subscriptions: {e}")),
        }

        if self.services.config().operator_catalog_image.is_some() {
            if let Err(e) = olm.delete_test_catalog().await {
                issues.push(format!("test catalog: {e}"));
            }
        }

        for issue in &issues {
            warn!(issue = %issue, "Run cleanup issue");
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::context::tests::services;
    use crate::feature::parse;
    use crate::gateway::{GatewayError, MemoryCluster, Verb};
    use crate::steps::table::{OptionField, TableOptions};
    use crate::steps::StepFuture;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    struct MapOptions {
        value: Option<String>,
    }

    impl TableOptions for MapOptions {
        const FIELDS: &'static [OptionField] = &[OptionField::text("value")];
    }

    fn config_map(ctx: &mut ScenarioContext, name: String, options: MapOptions) -> StepFuture<'_> {
        Box::pin(async move {
            let map = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name),
                    namespace: Some(ctx.namespace().to_string()),
                    ..Default::default()
                },
                data: options.value.map(|v| [("value".to_string(), v)].into()),
                ..Default::default()
            };
            ctx.apply_recorded(&map).await?;
            Ok(())
        })
    }

    fn fails(_ctx: &mut ScenarioContext) -> StepFuture<'_> {
        Box::pin(async { Err(StepError::Assertion("expected failure".to_string())) })
    }

    fn registry() -> StepRegistry {
        let mut registry = StepRegistry::new();
        registry
            .step_with_table(r#"config map "([^"]*)" exists"#, config_map)
            .unwrap()
            .step("something fails", fails)
            .unwrap();
        registry
    }

    const FEATURE: &str = r#"
Feature: Runner
  Scenario: passes
    Given config map "a" exists

  Scenario: fails midway
    Given config map "a" exists
    When something fails
    Then config map "b" exists

  Scenario: rejected
    Given config map "a" exists
      | colour | red |
"#;

    #[tokio::test]
    async fn test_failing_step_skips_rest_and_tears_down() {
        let cluster = Arc::new(MemoryCluster::new());
        let runner = ScenarioRunner::new(services(cluster.clone()), registry());
        let feature = parse(FEATURE, "runner.feature").unwrap();

        let result = runner.run_scenario(&feature.scenarios[1]).await;
        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.failing_step.as_deref(), Some("When something fails"));
        assert_eq!(result.failure_kind, Some(FailureKind::Assertion));
        assert_eq!(cluster.calls_matching(Verb::Create, "ConfigMap").len(), 1);
        assert!(result.teardown.is_clean(), "{:?}", result.teardown.issues);
        assert_eq!(cluster.calls_matching(Verb::Delete, "ConfigMap").len(), 1);
        assert_eq!(cluster.calls_matching(Verb::Delete, "Namespace").len(), 1);
    }

    #[tokio::test]
    async fn test_setup_failure_skips_steps_but_tears_down() {
        let cluster = Arc::new(MemoryCluster::new());
        cluster.fail_next(
            Verb::Create,
            "Namespace",
            GatewayError::Api {
                what: "Namespace".to_string(),
                code: 403,
                message: "forbidden".to_string(),
            },
        );
        let runner = ScenarioRunner::new(services(cluster.clone()), registry());
        let feature = parse(FEATURE, "runner.feature").unwrap();

        let result = runner.run_scenario(&feature.scenarios[0]).await;

        assert_eq!(result.status, ScenarioStatus::Failed);
        assert_eq!(result.failure_kind, Some(FailureKind::Platform));
        assert!(result.failing_step.is_none());
        assert!(result.error_message.as_deref().unwrap_or_default().starts_with("setup"));
        assert!(cluster.calls_matching(Verb::Get, "ConfigMap").is_empty());
        assert!(cluster.calls_matching(Verb::Create, "ConfigMap").is_empty());

        // the workspace made before the failure is removed; the namespace never existed
        assert!(result.teardown.is_clean(), "{:?}", result.teardown.issues);
        assert_eq!(result.teardown.removed.len(), 1);
        assert!(!std::path::Path::new(&result.teardown.removed[0]).exists());
        assert!(cluster.calls_matching(Verb::Delete, "Namespace").is_empty());
    }

    #[tokio::test]
    async fn test_rejected_scenario_makes_no_cluster_calls() {
        let cluster = Arc::new(MemoryCluster::new());
        let runner = ScenarioRunner::new(services(cluster.clone()), registry());
        let feature = parse(FEATURE, "runner.feature").unwrap();

        let result = runner.run_scenario(&feature.scenarios[2]).await;
        assert_eq!(result.failure_kind, Some(FailureKind::Configuration));
        assert!(result.error_message.unwrap().contains("colour"));
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("reports/run.jsonl");
        let cluster = Arc::new(MemoryCluster::new());
        let config = RunConfig::default()
            .report_path(&report)
            .name_filter("^(passes|fails midway)$");
        let services = Arc::new(Services::new(config, cluster.clone()).unwrap());
        let runner = ScenarioRunner::new(services, registry());
        let features = vec![parse(FEATURE, "runner.feature").unwrap()];

        let summary = runner.run(&features).await.unwrap();
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.is_success());

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&report)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["status"], "passed");
        assert_eq!(lines[0]["scenario_id"], "runner.feature:3");
        assert!(lines[0].get("failing_step").is_none());
        assert_eq!(lines[1]["failure_kind"], "assertion");
        assert_eq!(lines[1]["failing_step"], "When something fails");
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_remaining_scenarios() {
        let cluster = Arc::new(MemoryCluster::new());
        let runner = ScenarioRunner::new(services(cluster.clone()), registry());
        runner.services().cancel_token().cancel();
        let features = vec![parse(FEATURE, "runner.feature").unwrap()];

        let summary = runner.run(&features).await.unwrap();
        assert_eq!(summary.skipped(), 3);
        assert!(cluster.calls_matching(Verb::Create, "Namespace").is_empty());
    }

    #[test]
    fn test_summary_lists_failures_and_dirty_teardowns() {
        let feature = parse(FEATURE, "runner.feature").unwrap();
        let mut failed = ScenarioResult::new(&feature.scenarios[1], ScenarioStatus::Passed);
        failed.fail(
            feature.scenarios[1].steps.get(1),
            &StepError::Assertion("pods not ready\nmore detail".to_string()),
        );
        let mut dirty = ScenarioResult::new(&feature.scenarios[0], ScenarioStatus::Passed);
        dirty.teardown.issues.push(crate::context::TeardownIssue {
            stage: crate::context::TeardownStage::Resources,
            target: "ConfigMap ns/a".to_string(),
            message: "already absent".to_string(),
        });

        let summary = RunSummary {
            results: vec![dirty, failed],
            cleanup_issues: vec!["test catalog: forbidden".to_string()],
            duration: Duration::from_secs(125),
        };
        let text = summary.to_string();
        assert!(text.contains("2 scenarios: 1 passed, 1 failed, 0 skipped (2m 5s)"));
        assert!(text.contains("step: When something fails"));
        assert!(text.contains("assertion: pods not ready"));
        assert!(!text.contains("more detail"));
        assert!(text.contains("! runner.feature:3 resources: ConfigMap ns/a: already absent"));
        assert!(text.contains("! run cleanup: test catalog: forbidden"));
    }
}
