//! # Orchestration Types
//!
//! Shared data structures for branch creation, branch results, and step
//! execution requests exchanged with the host platform's step executor.

use crate::models::{Location, RunContext, StepInfo};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// A branch creation request.
///
/// Exactly one of `predefined_paths`, `branch_count`, or a Navigator query
/// determines how many branches a parallel request materializes. A parallel
/// request with none of the three is a programmer error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchConfig {
    /// Step the branches are spawned from
    pub parent_step_id: String,
    pub parallel: bool,
    /// Explicit branch count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_count: Option<usize>,
    /// Predefined step paths, one branch per path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predefined_paths: Option<Vec<Vec<Location>>>,
}

impl BranchConfig {
    pub fn sequential(parent_step_id: impl Into<String>) -> Self {
        Self {
            parent_step_id: parent_step_id.into(),
            parallel: false,
            branch_count: None,
            predefined_paths: None,
        }
    }

    pub fn parallel(parent_step_id: impl Into<String>) -> Self {
        Self {
            parent_step_id: parent_step_id.into(),
            parallel: true,
            branch_count: None,
            predefined_paths: None,
        }
    }

    pub fn with_branch_count(mut self, count: usize) -> Self {
        self.branch_count = Some(count);
        self
    }

    pub fn with_predefined_paths(mut self, paths: Vec<Vec<Location>>) -> Self {
        self.predefined_paths = Some(paths);
        self
    }
}

/// Outcome of running one branch to completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    pub branch_id: Uuid,
    pub success: bool,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    /// Step outputs collected across the branch; a key produced by more
    /// than one step holds an array of each step's value
    pub outputs: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BranchResult {
    /// Result for a branch that failed before executing any step.
    pub fn failed(branch_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            branch_id,
            success: false,
            completed_steps: 0,
            failed_steps: 1,
            skipped_steps: 0,
            outputs: HashMap::new(),
            error: Some(error.into()),
        }
    }
}

/// Request handed to the host platform's step executor, one per step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionRequest {
    pub run_id: Uuid,
    pub step_id: String,
    pub step_info: StepInfo,
    /// Snapshot of the branch-local context at invocation time
    pub context: RunContext,
    pub location: Location,
}

/// Structured outcome of a single step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepExecutionResult {
    pub fn succeeded(outputs: HashMap<String, Value>, duration_ms: u64) -> Self {
        Self {
            success: true,
            outputs: Some(outputs),
            error: None,
            duration_ms,
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            outputs: None,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Counters exposed by a coordinator instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub branches_created: u64,
    pub branches_completed: u64,
    pub branches_failed: u64,
    pub branches_cancelled: u64,
    pub steps_executed: u64,
}
