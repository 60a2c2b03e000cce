use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Engine tuning knobs. Every field has a default, so a partial YAML
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on the steps one stimulus may cascade through before it is
    /// rejected with `CascadeLimitExceeded`.
    pub max_cascade_steps: usize,
    /// Initial state of the event dispatcher.
    pub dispatch_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_steps: 10_000,
            dispatch_enabled: true,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml_str)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml("max_cascade_steps: 50\n").unwrap();
        assert_eq!(config.max_cascade_steps, 50);
        assert!(config.dispatch_enabled);
    }

    #[test]
    fn test_rejects_wrong_type() {
        assert!(EngineConfig::from_yaml("dispatch_enabled: maybe\n").is_err());
    }
}
