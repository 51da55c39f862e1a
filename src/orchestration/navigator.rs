//! Navigator contract.
//!
//! The Navigator is a pure graph-query service owned by the host platform:
//! it translates a workflow graph into reachable locations and parallel
//! path sets. The coordinator never walks the graph itself.

use crate::models::{Location, StepInfo};
use async_trait::async_trait;

#[async_trait]
pub trait Navigator: Send + Sync {
    /// Path sets for a parallel split rooted at `location`; empty when the
    /// node has no parallel paths.
    async fn get_parallel_branches(&self, location: &Location)
        -> anyhow::Result<Vec<Vec<Location>>>;

    /// Step metadata for the node at `location`.
    async fn get_step_info(&self, location: &Location) -> anyhow::Result<StepInfo>;
}
