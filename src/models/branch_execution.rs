//! Branch execution records and their partial-update payloads.

use crate::models::StepStatus;
use crate::state_machine::BranchState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Full record of one execution branch of a run.
///
/// Owned exclusively by the coordinator's in-memory branch table for the
/// duration of a run, mirrored to the Run State Store for durability, and
/// removed from the table only by explicit cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchExecution {
    /// Globally unique branch id
    pub id: Uuid,
    /// Owning run
    pub run_id: Uuid,
    /// Step the branch was spawned from
    pub parent_step_id: String,
    /// Ordered per-step execution records
    pub step_statuses: Vec<StepStatus>,
    pub state: BranchState,
    pub parallel: bool,
    /// Which of N parallel paths this branch walks; `None` when sequential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_index: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BranchExecution {
    pub fn new(
        run_id: Uuid,
        parent_step_id: impl Into<String>,
        parallel: bool,
        branch_index: Option<usize>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            parent_step_id: parent_step_id.into(),
            step_statuses: Vec::new(),
            state: BranchState::Pending,
            parallel,
            branch_index,
            created_at: now,
            updated_at: now,
        }
    }

    /// Find the status record for a step, creating a pending one when the
    /// step has not been tracked yet.
    pub fn status_mut(&mut self, step_id: &str) -> &mut StepStatus {
        let position = match self
            .step_statuses
            .iter()
            .position(|status| status.step_id == step_id)
        {
            Some(position) => position,
            None => {
                self.step_statuses.push(StepStatus::pending(step_id));
                self.step_statuses.len() - 1
            }
        };
        &mut self.step_statuses[position]
    }

    pub fn transition_to(&mut self, state: BranchState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// Partial update applied to a persisted branch record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BranchState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_statuses: Option<Vec<StepStatus>>,
}

impl BranchUpdate {
    pub fn state(state: BranchState) -> Self {
        Self {
            state: Some(state),
            step_statuses: None,
        }
    }

    pub fn with_step_statuses(mut self, step_statuses: Vec<StepStatus>) -> Self {
        self.step_statuses = Some(step_statuses);
        self
    }
}
