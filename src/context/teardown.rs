//! Undoing a scenario
//!
//! Stages run in a fixed order: teardown callbacks, applied resources,
//! operators, namespace, files. Within a stage the newest entry goes first.
//! Every stage is best effort: failures become [`TeardownIssue`]s and the
//! next entry or stage still runs. Teardown ignores cancellation.

use k8s_openapi::api::core::v1::Namespace;
use serde::Serialize;
use std::fmt;
use tracing::{info, instrument, warn};

use super::ScenarioContext;
use crate::olm::UninstallOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownStage {
    Callbacks,
    Resources,
    Operators,
    Namespace,
    Files,
}

impl fmt::Display for TeardownStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Callbacks => "callbacks",
            Self::Resources => "resources",
            Self::Operators => "operators",
            Self::Namespace => "namespace",
            Self::Files => "files",
        };
        f.write_str(name)
    }
}

/// One soft failure during teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownIssue {
    pub stage: TeardownStage,
    pub target: String,
    pub message: String,
}

impl fmt::Display for TeardownIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.stage, self.target, self.message)
    }
}

/// What teardown removed and what it could not
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Removed targets in removal order
    pub removed: Vec<String>,
    pub issues: Vec<TeardownIssue>,
    /// Namespace and its contents left for debugging
    pub kept_namespace: bool,
}

impl TeardownReport {
    /// No stage reported a problem
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    fn issue(&mut self, stage: TeardownStage, target: impl Into<String>, message: impl Into<String>) {
        let issue = TeardownIssue {
            stage,
            target: target.into(),
            message: message.into(),
        };
        warn!(stage = %issue.stage, target = %issue.target, error = %issue.message, "Teardown issue");
        self.issues.push(issue);
    }
}

impl ScenarioContext {
    /// Undo everything the scenario recorded
    ///
    /// With `keep_namespace`, objects inside the scenario namespace and the
    /// namespace itself are left in place. Calling it twice is harmless.
    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn teardown(&mut self, keep_namespace: bool) -> TeardownReport {
        let mut report = TeardownReport {
            kept_namespace: keep_namespace && self.namespace_created,
            ..Default::default()
        };
        let gateway = self.services.gateway().clone();

        while let Some(cleanup) = self.cleanups.pop() {
            match (cleanup.run)(self.services.clone()).await {
                Ok(()) => report.removed.push(cleanup.label),
                Err(e) => report.issue(TeardownStage::Callbacks, cleanup.label, e),
            }
        }

        while let Some(resource) = self.applied_resources.pop() {
            if keep_namespace && resource.namespace.as_deref() == Some(self.namespace.as_str()) {
                continue;
            }
            match gateway.delete_ref(&resource).await {
                Ok(true) => report.removed.push(resource.to_string()),
                Ok(false) => report.issue(TeardownStage::Resources, resource.to_string(), "already absent"),
                Err(e) => report.issue(TeardownStage::Resources, resource.to_string(), e.to_string()),
            }
        }

        while let Some(id) = self.installed_operators.pop() {
            if keep_namespace && id.namespace == self.namespace {
                continue;
            }
            match self.services.olm().uninstall(&id).await {
                Ok(UninstallOutcome::Removed { .. }) => report.removed.push(format!("Subscription {id}")),
                Ok(UninstallOutcome::AlreadyAbsent) => {
                    report.issue(TeardownStage::Operators, id.to_string(), "subscription already absent")
                }
                Err(e) => report.issue(TeardownStage::Operators, id.to_string(), e.to_string()),
            }
        }

        if self.namespace_created && !keep_namespace {
            let target = format!("Namespace {}", self.namespace);
            match gateway.delete_by_key::<Namespace>(None, &self.namespace).await {
                Ok(true) => report.removed.push(target),
                Ok(false) => report.issue(TeardownStage::Namespace, target, "already absent"),
                Err(e) => report.issue(TeardownStage::Namespace, target, e.to_string()),
            }
            self.namespace_created = false;
        }

        match tokio::fs::remove_dir_all(&self.workspace).await {
            Ok(()) => report.removed.push(self.workspace.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report.issue(TeardownStage::Files, self.workspace.display().to_string(), e.to_string()),
        }
        self.source_trees.clear();

        if report.is_clean() {
            info!(removed = report.removed.len(), "Teardown complete");
        } else {
            warn!(issues = report.issues.len(), "Teardown left issues");
        }
        report
    }
}
