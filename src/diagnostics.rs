//! Failure diagnostics for scenario debugging
//!
//! Collected when a scenario fails and attached to its result record.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::ResourceExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::gateway::Gateway;

const LINE_WIDTH: usize = 80;
const HEAVY_LINE: &str = "━";
const LIGHT_LINE: &str = "─";
const MAX_LOG_LINES: usize = 50;
const MAX_MESSAGE_LEN: usize = 45;

/// One namespace event, flattened for reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventLine {
    pub timestamp: Option<String>,
    pub object: String,
    pub reason: String,
    pub message: String,
}

impl From<&Event> for EventLine {
    fn from(event: &Event) -> Self {
        let kind = event.involved_object.kind.as_deref().unwrap_or("?");
        let name = event.involved_object.name.as_deref().unwrap_or("?");
        Self {
            timestamp: event
                .last_timestamp
                .as_ref()
                .map(|t| t.0.format("%H:%M:%S").to_string()),
            object: format!("{kind}/{name}"),
            reason: event.reason.clone().unwrap_or_else(|| "Unknown".to_string()),
            message: event.message.clone().unwrap_or_default(),
        }
    }
}

/// Collected diagnostic information from a failed scenario
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub scenario: String,
    pub namespace: String,
    pub failing_step: Option<String>,
    /// Whether the namespace was left in place
    pub kept: bool,
    /// Pod name -> logs
    pub pod_logs: BTreeMap<String, String>,
    /// Oldest first
    pub events: Vec<EventLine>,
}

impl Diagnostics {
    pub fn new(scenario: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Gather events and pod logs from `namespace`, best effort
    pub async fn collect(gateway: &Gateway, scenario: &str, namespace: &str) -> Self {
        let mut diag = Self::new(scenario, namespace);

        match gateway.list::<Event>(Some(namespace)).await {
            Ok(mut events) => {
                // events without a timestamp go last
                events.sort_by_key(|e| {
                    e.last_timestamp
                        .as_ref()
                        .map(|t| t.0)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC)
                });
                diag.events = events.iter().map(EventLine::from).collect();
            }
            Err(e) => warn!(namespace, error = %e, "Failed to collect events for diagnostics"),
        }

        match gateway.list::<Pod>(Some(namespace)).await {
            Ok(pods) => {
                for pod in pods {
                    let name = pod.name_any();
                    let logs = match gateway.pod_logs(namespace, &name).await {
                        Ok(logs) => logs,
                        Err(e) => format!("[error getting logs: {e}]"),
                    };
                    diag.pod_logs.insert(name, logs);
                }
            }
            Err(e) => warn!(namespace, error = %e, "Failed to collect pod logs for diagnostics"),
        }

        diag
    }

    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.failing_step = Some(step.into());
        self
    }

    #[must_use]
    pub fn kept(mut self, kept: bool) -> Self {
        self.kept = kept;
        self
    }

    fn heavy_line() -> String {
        HEAVY_LINE.repeat(LINE_WIDTH)
    }

    fn section_header(title: &str) -> String {
        let title_with_spaces = format!(" {title} ");
        let remaining = LINE_WIDTH.saturating_sub(title_with_spaces.chars().count() + 3);
        format!(
            "{}{}{}",
            LIGHT_LINE.repeat(3),
            title_with_spaces,
            LIGHT_LINE.repeat(remaining)
        )
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "{}", Self::heavy_line())?;
        writeln!(f, "  KOGITO BDD SCENARIO FAILED")?;
        writeln!(f, "{}", Self::heavy_line())?;
        writeln!(f)?;
        writeln!(f, "  Scenario:  {}", self.scenario)?;
        if let Some(step) = &self.failing_step {
            writeln!(f, "  Step:      {step}")?;
        }
        if self.kept {
            writeln!(f, "  Namespace: {} (kept for debugging)", self.namespace)?;
        } else {
            writeln!(f, "  Namespace: {}", self.namespace)?;
        }

        if !self.pod_logs.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", Self::section_header("Pod Logs"))?;

            for (pod_name, logs) in &self.pod_logs {
                writeln!(f)?;
                writeln!(f, "[{pod_name}]")?;

                if logs.is_empty() {
                    writeln!(f, "  (no logs)")?;
                    continue;
                }
                let lines: Vec<&str> = logs.lines().collect();
                let skipped = lines.len().saturating_sub(MAX_LOG_LINES);
                if skipped > 0 {
                    writeln!(f, "  ... ({skipped} earlier lines)")?;
                }
                for line in &lines[skipped..] {
                    writeln!(f, "  {line}")?;
                }
            }
        }

        if !self.events.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{}",
                Self::section_header(&format!("Events ({})", self.events.len()))
            )?;
            writeln!(f)?;

            for event in &self.events {
                let message = if event.message.chars().count() > MAX_MESSAGE_LEN {
                    let cut: String = event.message.chars().take(MAX_MESSAGE_LEN).collect();
                    format!("{cut}...")
                } else {
                    event.message.clone()
                };
                writeln!(
                    f,
                    "  • {}  {:12}  {:10}  {}",
                    event.timestamp.as_deref().unwrap_or("??:??:??"),
                    event.object,
                    event.reason,
                    message
                )?;
            }
        }

        if self.kept {
            writeln!(f)?;
            writeln!(f, "{}", Self::section_header("Debug"))?;
            writeln!(f)?;
            writeln!(f, "  kubectl -n {} get kogitoruntimes,kogitobuilds,kogitoinfras", self.namespace)?;
            writeln!(f, "  kubectl -n {} describe pods", self.namespace)?;
            writeln!(f, "  kubectl delete ns {}  # cleanup", self.namespace)?;
        }
        writeln!(f)?;
        writeln!(f, "{}", Self::heavy_line())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryCluster;
    use k8s_openapi::api::core::v1::ObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use chrono::TimeZone;
    use kube::api::ObjectMeta;
    use std::sync::Arc;

    fn event(name: &str, reason: &str, message: &str, minute: u32) -> Event {
        Event {
            metadata: ObjectMeta {
                name: Some(format!("{name}.{minute}")),
                namespace: Some("s1".to_string()),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: ObjectReference {
                kind: Some("Pod".to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            last_timestamp: Some(Time(Utc.with_ymd_and_hms(2024, 1, 15, 10, minute, 1).unwrap())),
            ..Default::default()
        }
    }

    #[test]
    fn test_display_has_header_and_scenario() {
        let output = Diagnostics::new("Deploy quarkus runtime", "deploy-quarkus-1a2b3c4d")
            .with_step("Then Runtime \"example\" has 1 pod running within 1 minute")
            .to_string();

        assert!(output.contains("KOGITO BDD SCENARIO FAILED"));
        assert!(output.contains("━━━"));
        assert!(output.contains("Scenario:  Deploy quarkus runtime"));
        assert!(output.contains("Step:      Then Runtime"));
        assert!(!output.contains("kubectl delete ns"));
    }

    #[test]
    fn test_debug_commands_only_when_kept() {
        let output = Diagnostics::new("s", "s-1").kept(true).to_string();
        assert!(output.contains("(kept for debugging)"));
        assert!(output.contains("kubectl delete ns s-1"));
    }

    #[test]
    fn test_long_logs_keep_the_tail() {
        let mut diag = Diagnostics::new("s", "s-1");
        let logs: Vec<String> = (0..60).map(|i| format!("line {i}")).collect();
        diag.pod_logs.insert("example-1".to_string(), logs.join("\n"));

        let output = diag.to_string();
        assert!(output.contains("[example-1]"));
        assert!(output.contains("(10 earlier lines)"));
        assert!(output.contains("line 59"));
        assert!(!output.contains("line 9\n"));
    }

    #[test]
    fn test_event_lines() {
        let line = EventLine::from(&event("example-1", "BackOff", "Back-off pulling image", 42));
        assert_eq!(line.object, "Pod/example-1");
        assert_eq!(line.timestamp.as_deref(), Some("10:42:01"));

        let mut diag = Diagnostics::new("s", "s-1");
        diag.events.push(line);
        let output = diag.to_string();
        assert!(output.contains("Events (1)"));
        assert!(output.contains("•"));
    }

    #[tokio::test]
    async fn test_collect_from_namespace() {
        let cluster = Arc::new(
            MemoryCluster::new()
                .with_object(&event("example-1", "Pulled", "pulled", 5))
                .with_object(&event("example-1", "Started", "started", 1))
                .with_object(&Pod {
                    metadata: ObjectMeta {
                        name: Some("example-1".to_string()),
                        namespace: Some("s1".to_string()),
                        ..Default::default()
                    },
                    ..Default::default()
                }),
        );
        cluster.set_pod_logs("s1", "example-1", "Started in 1.2s");

        let diag = Diagnostics::collect(&Gateway::new(cluster), "s", "s1").await;
        assert_eq!(diag.events.len(), 2);
        assert_eq!(diag.events[0].reason, "Started");
        assert_eq!(diag.pod_logs["example-1"], "Started in 1.2s");
    }
}
