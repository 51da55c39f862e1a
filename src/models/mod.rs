//! # Data Model
//!
//! Value types for locations, step metadata, run context, branch records,
//! and the parent run. These are the types exchanged with the Navigator,
//! Step Executor, and Run State Store collaborators.

pub mod branch_execution;
pub mod location;
pub mod run;
pub mod run_context;
pub mod step_status;

pub use branch_execution::{BranchExecution, BranchUpdate};
pub use location::{Location, StepInfo};
pub use run::{RecoveryStrategy, Run, RunConfig};
pub use run_context::{deep_clone_blackboard, RunContext, Scope};
pub use step_status::StepStatus;
