//! Per-step execution records.

use crate::state_machine::StepState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution record for one step within a branch.
///
/// Created lazily the first time a step is executed (or seeded as `pending`
/// when a branch is built from a predefined path), updated by the
/// coordinator, never deleted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step_id: String,
    pub state: StepState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl StepStatus {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            state: StepState::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = StepState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: Option<Value>) {
        self.state = StepState::Completed;
        self.completed_at = Some(Utc::now());
        self.result = result;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = StepState::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn mark_skipped(&mut self) {
        self.state = StepState::Skipped;
    }
}
