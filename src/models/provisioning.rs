use chrono::{DateTime, Utc};
use serde::Serialize;

use super::topology::LinkEdge;
use crate::error::ProvisionError;

/// Orchestrator run states, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Collecting,
    Inferring,
    CreatingProject,
    CreatingNodes,
    PushingConfig,
    CreatingLinks,
    Done,
    PartiallyFailed,
}

/// Outcome of one step for one device or edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Failed {
        error: ProvisionError,
    },
    /// Not attempted because an earlier step for a dependency failed
    Skipped {
        reason: String,
    },
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self::Succeeded { id: None }
    }

    pub fn ok_with(id: impl Into<String>) -> Self {
        Self::Succeeded { id: Some(id.into()) }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped { reason: reason.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Per-device result of a run
#[derive(Debug, Clone, Serialize)]
pub struct DeviceOutcome {
    pub device: String,
    pub collection: StepOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Template match; `Succeeded.id` carries the template id
    pub template: StepOutcome,
    pub node: StepOutcome,
    pub config_push: StepOutcome,
}

impl DeviceOutcome {
    pub fn succeeded(&self) -> bool {
        self.collection.is_success()
            && self.template.is_success()
            && self.node.is_success()
            && self.config_push.is_success()
    }
}

/// Per-edge result of a run
#[derive(Debug, Clone, Serialize)]
pub struct LinkOutcome {
    pub edge: LinkEdge,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub devices_total: usize,
    pub devices_succeeded: usize,
    pub links_total: usize,
    pub links_succeeded: usize,
}

/// ProvisioningResult is the externally visible record of a run
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningResult {
    pub run_id: String,
    pub project_name: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_url: Option<String>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub devices: Vec<DeviceOutcome>,
    pub links: Vec<LinkOutcome>,
    pub summary: Summary,
}

impl ProvisioningResult {
    /// Terminal state for a set of outcomes: `Done` only when nothing failed or was skipped
    pub fn terminal_state(devices: &[DeviceOutcome], links: &[LinkOutcome]) -> RunState {
        let all_ok = devices.iter().all(DeviceOutcome::succeeded)
            && links.iter().all(|l| l.outcome.is_success());
        if all_ok {
            RunState::Done
        } else {
            RunState::PartiallyFailed
        }
    }

    pub fn summarize(devices: &[DeviceOutcome], links: &[LinkOutcome]) -> Summary {
        Summary {
            devices_total: devices.len(),
            devices_succeeded: devices.iter().filter(|d| d.succeeded()).count(),
            links_total: links.len(),
            links_succeeded: links.iter().filter(|l| l.outcome.is_success()).count(),
        }
    }

    #[allow(dead_code)]
    pub fn device(&self, identity: &str) -> Option<&DeviceOutcome> {
        self.devices.iter().find(|d| d.device == identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(device: &str, node: StepOutcome) -> DeviceOutcome {
        DeviceOutcome {
            device: device.to_string(),
            collection: StepOutcome::ok(),
            version: Some("4.28.3M".to_string()),
            template: StepOutcome::ok_with("tmpl-1"),
            node,
            config_push: StepOutcome::ok(),
        }
    }

    #[test]
    fn test_terminal_state() {
        let good = vec![outcome("sw1", StepOutcome::ok_with("n1"))];
        assert_eq!(ProvisioningResult::terminal_state(&good, &[]), RunState::Done);

        let mixed = vec![
            outcome("sw1", StepOutcome::ok_with("n1")),
            outcome("sw2", StepOutcome::skipped("no template")),
        ];
        assert_eq!(ProvisioningResult::terminal_state(&mixed, &[]), RunState::PartiallyFailed);

        let summary = ProvisioningResult::summarize(&mixed, &[]);
        assert_eq!(summary.devices_total, 2);
        assert_eq!(summary.devices_succeeded, 1);
    }

    #[test]
    fn test_step_outcome_serializes_with_status_tag() {
        let json = serde_json::to_value(StepOutcome::ok_with("abc")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "succeeded", "id": "abc"}));

        let json = serde_json::to_value(StepOutcome::Failed {
            error: ProvisionError::ConfigPushFailed {
                device: "sw1".to_string(),
                reason: "timeout".to_string(),
            },
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"]["kind"], "config_push_failed");
    }
}
