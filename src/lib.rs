#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Branch Coordinator
//!
//! Branch execution coordinator for workflow run orchestration: the
//! concurrency-and-state-machine core that splits a running workflow into
//! execution branches, runs them in parallel or in sequence, isolates each
//! branch's mutable state, collects and merges outputs, and applies
//! configurable failure-recovery policies.
//!
//! ## Architecture
//!
//! The crate is a library-level orchestration unit invoked by a higher-level
//! run engine. Graph knowledge, step logic, durability, and event delivery
//! are delegated to host-platform collaborators behind async traits:
//!
//! - [`orchestration::Navigator`] answers "where can execution go from here"
//!   queries over the workflow graph
//! - [`orchestration::StepExecutor`] runs a single step's logic
//! - [`orchestration::RunStateStore`] persists branch records for crash
//!   recovery ([`orchestration::InMemoryRunStateStore`] ships for embedded
//!   and test use)
//! - [`events::EventBus`] carries lifecycle events
//!   ([`events::BroadcastEventBus`] is the in-process default)
//!
//! ## Key Guarantees
//!
//! - **Isolation**: each branch executes against a structurally cloned
//!   context; concurrent branches never observe each other's writes
//! - **All-settle joins**: one branch's crash cannot starve or corrupt
//!   siblings, and callers always receive one result per attempted branch
//! - **Graceful degradation**: navigator anomalies (empty path sets, stale
//!   branch indices) degrade with a warning instead of crashing
//! - **Availability over strict durability**: persistence failures are
//!   logged and never abort an in-progress run
//! - **Restart recovery**: persisted branch state reloads verbatim after a
//!   process restart
//!
//! ## Module Organization
//!
//! - [`models`] - Locations, step metadata, run context, branch records
//! - [`state_machine`] - Branch and step state definitions
//! - [`events`] - Typed lifecycle events and the event bus
//! - [`orchestration`] - The coordinator and its collaborator contracts
//! - [`config`] - Coordinator instance configuration
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging initialization
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use branch_coordinator::events::BroadcastEventBus;
//! use branch_coordinator::orchestration::{BranchCoordinator, InMemoryRunStateStore};
//! use uuid::Uuid;
//!
//! # tokio_test::block_on(async {
//! let coordinator = BranchCoordinator::new(
//!     Arc::new(InMemoryRunStateStore::new()),
//!     Arc::new(BroadcastEventBus::default()),
//! );
//!
//! // Sequential execution uses a single branch abstraction for uniformity.
//! let run_id = Uuid::new_v4();
//! let branch = coordinator
//!     .create_sequential_branch(run_id, "collect-input")
//!     .await
//!     .unwrap();
//!
//! assert_eq!(coordinator.get_branch_status(branch.id).unwrap().id, branch.id);
//! # });
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;

pub use config::CoordinatorConfig;
pub use error::{CoordinatorError, Result};
pub use events::{BroadcastEventBus, Event, EventBus, EventData, EventSource, EventType};
pub use models::{
    BranchExecution, BranchUpdate, Location, RecoveryStrategy, Run, RunConfig, RunContext, Scope,
    StepInfo, StepStatus,
};
pub use orchestration::{
    BranchConfig, BranchCoordinator, BranchResult, CoordinatorStats, InMemoryRunStateStore,
    Navigator, RunStateStore, StepExecutionRequest, StepExecutionResult, StepExecutor,
};
pub use state_machine::{BranchState, StepState};
