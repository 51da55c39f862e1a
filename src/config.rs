//! # Coordinator Configuration
//!
//! Runtime configuration for the coordinator instance, layered from built-in
//! defaults and `COORDINATOR_`-prefixed environment variables.

use crate::constants::system;
use crate::error::{CoordinatorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for a coordinator instance.
///
/// These settings govern coordinator-side resource usage, not run semantics.
/// Per-run behavior (recovery strategy, parallelization) lives on
/// [`crate::models::RunConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Maximum number of branch executions in flight at once.
    pub max_concurrent_branches: usize,
    /// Capacity of the in-process event broadcast channel.
    pub event_channel_capacity: usize,
    /// Free-form settings passed through to host-platform adapters.
    #[serde(default)]
    pub custom_settings: HashMap<String, String>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_branches: system::DEFAULT_MAX_CONCURRENT_BRANCHES,
            event_channel_capacity: system::DEFAULT_EVENT_CHANNEL_CAPACITY,
            custom_settings: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Load configuration from defaults overlaid with `COORDINATOR_*`
    /// environment variables (e.g. `COORDINATOR_MAX_CONCURRENT_BRANCHES=4`).
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .set_default(
                "max_concurrent_branches",
                system::DEFAULT_MAX_CONCURRENT_BRANCHES as i64,
            )
            .map_err(|e| CoordinatorError::ConfigurationError(e.to_string()))?
            .set_default(
                "event_channel_capacity",
                system::DEFAULT_EVENT_CHANNEL_CAPACITY as i64,
            )
            .map_err(|e| CoordinatorError::ConfigurationError(e.to_string()))?
            .add_source(config::Environment::with_prefix("COORDINATOR").try_parsing(true))
            .build()
            .map_err(|e| CoordinatorError::ConfigurationError(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| CoordinatorError::ConfigurationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_limits() {
        let config = CoordinatorConfig::default();
        assert!(config.max_concurrent_branches > 0);
        assert!(config.event_channel_capacity > 0);
    }

    #[test]
    fn load_uses_defaults_without_env_overrides() {
        let config = CoordinatorConfig::load().expect("load should succeed");
        assert_eq!(
            config.max_concurrent_branches,
            system::DEFAULT_MAX_CONCURRENT_BRANCHES
        );
    }
}
