//! Step executor contract.
//!
//! The host platform implements this to run a single step's logic (tools,
//! models, sub-routines). The coordinator invokes it once per step and
//! treats both `Err` returns and panics as failed steps; per-step timeout
//! enforcement belongs to the implementation.

use crate::orchestration::types::{StepExecutionRequest, StepExecutionResult};
use async_trait::async_trait;

#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(
        &self,
        request: StepExecutionRequest,
    ) -> anyhow::Result<StepExecutionResult>;
}
