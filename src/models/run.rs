//! Run and run configuration types.
//!
//! The run itself is owned by the surrounding engine; the coordinator only
//! reads its context and configuration.

use crate::models::RunContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Failure-recovery policy applied when a step inside a branch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    /// Accepted as configuration, currently behaves like `Skip`. The retry
    /// policy (backoff, max attempts) is not defined yet, so degrading to
    /// skip with an operator-visible warning beats pretending to retry.
    Retry,
    /// Record the failure and keep going; the branch still reports success
    Skip,
    /// Stop the branch at the first failed step and report failure
    #[default]
    Fail,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::Skip => write!(f, "skip"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

impl std::str::FromStr for RecoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "skip" => Ok(Self::Skip),
            "fail" => Ok(Self::Fail),
            _ => Err(format!("Invalid recovery strategy: {s}")),
        }
    }
}

/// Per-run execution limits and policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    /// Whether the run may split into parallel branches at all
    pub parallel_execution: bool,
    /// Steps between context checkpoints, when checkpointing is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_interval: Option<u64>,
    pub recovery_strategy: RecoveryStrategy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: None,
            max_depth: None,
            max_duration_secs: None,
            max_cost: None,
            parallel_execution: true,
            checkpoint_interval: None,
            recovery_strategy: RecoveryStrategy::default(),
        }
    }
}

impl RunConfig {
    pub fn with_recovery_strategy(strategy: RecoveryStrategy) -> Self {
        Self {
            recovery_strategy: strategy,
            ..Self::default()
        }
    }
}

/// One execution instance of a routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub routine_id: String,
    pub context: RunContext,
    pub config: RunConfig,
}

impl Run {
    pub fn new(routine_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            routine_id: routine_id.into(),
            context: RunContext::new(),
            config: RunConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_recovery_strategy_is_fail() {
        assert_eq!(RecoveryStrategy::default(), RecoveryStrategy::Fail);
        assert_eq!(
            RunConfig::default().recovery_strategy,
            RecoveryStrategy::Fail
        );
    }

    #[test]
    fn test_recovery_strategy_serde() {
        assert_eq!(
            serde_json::to_string(&RecoveryStrategy::Skip).unwrap(),
            "\"skip\""
        );
        let parsed: RecoveryStrategy = serde_json::from_str("\"retry\"").unwrap();
        assert_eq!(parsed, RecoveryStrategy::Retry);
        assert_eq!("fail".parse::<RecoveryStrategy>().unwrap(), RecoveryStrategy::Fail);
    }
}
