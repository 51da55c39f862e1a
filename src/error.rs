//! Error types for the branch coordinator.

use thiserror::Error;

/// Errors surfaced by coordinator operations.
///
/// Configuration errors are the only class a caller should treat as a
/// programmer error; step and branch failures are reported as data on
/// [`crate::orchestration::BranchResult`], never as errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Navigation error: {0}")]
    NavigationError(String),
    #[error("Execution error: {0}")]
    ExecutionError(String),
    #[error("Persistence error: {0}")]
    PersistenceError(String),
    #[error("Event error: {0}")]
    EventError(String),
    #[error("State transition error: {0}")]
    StateTransitionError(String),
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(error: serde_json::Error) -> Self {
        CoordinatorError::ExecutionError(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
