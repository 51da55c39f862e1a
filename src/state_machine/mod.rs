//! # State Machine
//!
//! Branch and step state definitions with transition predicates. Branch
//! lifecycle runs `pending -> running -> completed | failed`; step lifecycle
//! adds `ready` and `skipped` for steps that were scheduled but never run.

pub mod states;

pub use states::{BranchState, StepState};
