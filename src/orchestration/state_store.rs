//! # Run State Store
//!
//! Persistence contract for branch records, plus a DashMap-backed in-memory
//! implementation for embedded and test use.
//!
//! Persistence is best-effort from the coordinator's point of view: a store
//! failure is logged and never aborts an in-progress run. Implementations
//! should therefore surface errors honestly rather than retrying forever.

use crate::models::{BranchExecution, BranchUpdate};
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// All persisted branches of a run.
    async fn list_branches(&self, run_id: Uuid) -> anyhow::Result<Vec<BranchExecution>>;

    /// Persist a freshly created branch record.
    async fn create_branch(&self, run_id: Uuid, branch: &BranchExecution) -> anyhow::Result<()>;

    /// Apply a partial update to a persisted branch record.
    async fn update_branch(
        &self,
        run_id: Uuid,
        branch_id: Uuid,
        update: &BranchUpdate,
    ) -> anyhow::Result<()>;
}

/// In-memory store keyed by run id.
#[derive(Debug, Default)]
pub struct InMemoryRunStateStore {
    branches: DashMap<Uuid, Vec<BranchExecution>>,
}

impl InMemoryRunStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStateStore for InMemoryRunStateStore {
    async fn list_branches(&self, run_id: Uuid) -> anyhow::Result<Vec<BranchExecution>> {
        Ok(self
            .branches
            .get(&run_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn create_branch(&self, run_id: Uuid, branch: &BranchExecution) -> anyhow::Result<()> {
        self.branches
            .entry(run_id)
            .or_default()
            .push(branch.clone());
        Ok(())
    }

    async fn update_branch(
        &self,
        run_id: Uuid,
        branch_id: Uuid,
        update: &BranchUpdate,
    ) -> anyhow::Result<()> {
        let mut entry = self
            .branches
            .get_mut(&run_id)
            .ok_or_else(|| anyhow::anyhow!("run {run_id} has no persisted branches"))?;

        let branch = entry
            .iter_mut()
            .find(|branch| branch.id == branch_id)
            .ok_or_else(|| anyhow::anyhow!("branch {branch_id} not found for run {run_id}"))?;

        if let Some(state) = update.state {
            branch.state = state;
        }
        if let Some(step_statuses) = &update.step_statuses {
            branch.step_statuses = step_statuses.clone();
        }
        branch.updated_at = chrono::Utc::now();
        Ok(())
    }
}
