//! Engine configuration.
//!
//! Loaded from TOML via an explicit path (`--config <path>`) or `RIPPLE_CONFIG`,
//! then validated.
//! Every field is required in the file; [`EngineConfig::with_default_policies`]
//! is the programmatic starting point.

use crate::{ConfigError, InvalidationRule, ResourceType, TransitionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "RIPPLE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Per-subscription delivery buffer of the in-process bus.
    pub event_buffer: usize,
    /// Capacity of the staleness-changed broadcast channel.
    pub staleness_buffer: usize,
    /// Resource types to subscribe to. Empty subscribes to all.
    pub tracked_resource_types: Vec<ResourceType>,
    pub transitions: Vec<TransitionPolicy>,
    pub invalidations: Vec<InvalidationRule>,
}

impl EngineConfig {
    /// Location index-mode switches invalidate that location's directory listings.
    pub fn with_default_policies() -> Self {
        Self {
            event_buffer: 1024,
            staleness_buffer: 256,
            tracked_resource_types: Vec::new(),
            transitions: vec![TransitionPolicy::location_index_mode()],
            invalidations: vec![InvalidationRule::location_directory_listing()],
        }
    }

    /// Load and validate the file named by `explicit`, else by `RIPPLE_CONFIG`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_config_path(explicit).ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_buffer".to_string(),
                reason: "must be > 0".to_string(),
            });
        }
        if self.staleness_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "staleness_buffer".to_string(),
                reason: "must be > 0".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for policy in &self.transitions {
            if !seen.insert(policy.resource_type) {
                return Err(ConfigError::DuplicatePolicy {
                    resource_type: policy.resource_type,
                });
            }
            if policy.discriminant.field.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("transitions.{}.discriminant.field", policy.resource_type),
                    reason: "must not be empty".to_string(),
                });
            }
        }

        for rule in &self.invalidations {
            if rule.family.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("invalidations.{}.family", rule.resource_type),
                    reason: "must not be empty".to_string(),
                });
            }
            if !self.tracks(rule.resource_type) {
                return Err(ConfigError::InvalidValue {
                    field: format!("invalidations.{}", rule.resource_type),
                    reason: "resource type is not tracked".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether events of `resource_type` are subscribed to.
    pub fn tracks(&self, resource_type: ResourceType) -> bool {
        self.tracked_resource_types.is_empty()
            || self.tracked_resource_types.contains(&resource_type)
    }

    pub fn policy_for(&self, resource_type: ResourceType) -> Option<&TransitionPolicy> {
        self.transitions
            .iter()
            .find(|policy| policy.resource_type == resource_type)
    }
}

/// Config file location: an explicit path wins over `RIPPLE_CONFIG`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// A zero-sized buffer is always rejected, whichever buffer it is.
        #[test]
        fn prop_config_rejects_zero_buffers(event_buffer in 0usize..4, staleness_buffer in 0usize..4) {
            let mut config = EngineConfig::with_default_policies();
            config.event_buffer = event_buffer;
            config.staleness_buffer = staleness_buffer;

            let result = config.validate();
            if event_buffer == 0 || staleness_buffer == 0 {
                let is_invalid_value = matches!(result, Err(ConfigError::InvalidValue { .. }));
                prop_assert!(is_invalid_value);
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }
}
