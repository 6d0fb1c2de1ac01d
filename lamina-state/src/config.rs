//! Configuration for state sources and the root feedback loop

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Channel name used when none is configured
pub const DEFAULT_NAME: &str = "onion";

/// Settings for a root state source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Name of the state channel, carried into tracing output
    #[serde(default = "default_name")]
    pub name: String,

    /// Drop consecutive equal states before they reach subscribers
    #[serde(default = "default_true")]
    pub dedupe: bool,
}

fn default_name() -> String {
    String::from(DEFAULT_NAME)
}

fn default_true() -> bool {
    true
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            dedupe: true,
        }
    }
}

impl StateConfig {
    /// Parse a config from JSON, filling in defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Use a different channel name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Turn deduplication on or off
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StateError;

    #[test]
    fn test_defaults() {
        let config = StateConfig::from_json_str("{}").unwrap();
        assert_eq!(config, StateConfig::default());
        assert_eq!(config.name, "onion");
        assert!(config.dedupe);
    }

    #[test]
    fn test_overrides() {
        let config = StateConfig::from_json_str(r#"{"name": "state", "dedupe": false}"#).unwrap();
        assert_eq!(config, StateConfig::default().with_name("state").with_dedupe(false));
    }

    #[test]
    fn test_invalid_json() {
        let err = StateConfig::from_json_str("{name").unwrap_err();
        assert!(matches!(err, StateError::Config(_)));
    }
}
