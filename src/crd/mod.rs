//! Typed shapes of the cluster objects the harness drives
//!
//! - package manager: `Subscription`, `OperatorGroup`, `CatalogSource`,
//!   `ClusterServiceVersion`
//! - workloads: `KogitoRuntime`, `KogitoBuild`, `KogitoSupportingService`,
//!   `KogitoInfra`
//!
//! Only the fields the harness reads or writes are modelled. Unknown fields
//! sent by the server are ignored on decode.

mod kogito;
mod olm;

pub use kogito::*;
pub use olm::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status condition as reported by the operators
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn new(condition_type: &str, status: bool) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_message(mut self, reason: &str, message: &str) -> Self {
        self.reason = Some(reason.to_string());
        self.message = Some(message.to_string());
        self
    }

    pub fn is_true(&self) -> bool {
        self.status.eq_ignore_ascii_case("true")
    }
}

/// Whether `conditions` holds `condition_type` with status True
pub fn has_condition(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.r#type == condition_type && c.is_true())
}

/// The true condition of `condition_type`, if any
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type && c.is_true())
}

/// One-line rendering of a condition set for wait diagnostics
pub fn summarize_conditions(conditions: &[Condition]) -> String {
    if conditions.is_empty() {
        return "no conditions reported".to_string();
    }
    conditions
        .iter()
        .map(|c| match &c.reason {
            Some(reason) => format!("{}={} ({reason})", c.r#type, c.status),
            None => format!("{}={}", c.r#type, c.status),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_lookup() {
        let conditions = vec![
            Condition::new("Provisioning", false),
            Condition::new("Deployed", true).with_message("Ready", "all replicas up"),
        ];
        assert!(has_condition(&conditions, "Deployed"));
        assert!(!has_condition(&conditions, "Provisioning"));
        assert!(!has_condition(&conditions, "Failed"));
        assert_eq!(
            find_condition(&conditions, "Deployed").and_then(|c| c.message.as_deref()),
            Some("all replicas up")
        );
    }

    #[test]
    fn test_summary() {
        assert_eq!(summarize_conditions(&[]), "no conditions reported");
        let conditions = vec![
            Condition::new("Deployed", false).with_message("ImagePullBackOff", "cannot pull"),
            Condition::new("Failed", false),
        ];
        assert_eq!(
            summarize_conditions(&conditions),
            "Deployed=False (ImagePullBackOff), Failed=False"
        );
    }

    #[test]
    fn test_condition_decodes_from_server_json() {
        let condition: Condition = serde_json::from_value(serde_json::json!({
            "type": "Configured",
            "status": "True",
            "lastTransitionTime": "2024-01-01T00:00:00Z",
            "observedGeneration": 3
        }))
        .unwrap();
        assert!(condition.is_true());
        assert_eq!(condition.last_transition_time.as_deref(), Some("2024-01-01T00:00:00Z"));
    }
}
