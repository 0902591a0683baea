//! Realm configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hooked calls the default depth limit admits, one inside the other.
pub const DEFAULT_HOOKED_LEVELS: u32 = 128;
/// Activations one hooked call keeps open: the wrapper dispatch, the hook
/// body and the target body.
pub const ACTIVATIONS_PER_HOOKED_CALL: u32 = 3;
/// Default nesting limit, counted in activations.
pub const DEFAULT_MAX_CALL_DEPTH: u32 = DEFAULT_HOOKED_LEVELS * ACTIVATIONS_PER_HOOKED_CALL;
/// Default number of audit events retained before new ones are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Tunables for a [`crate::realm::Realm`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealmConfig {
    /// Maximum nesting of activations (function bodies, wrapper dispatches
    /// and lookups through wrappers) before a `RangeError`.
    pub max_call_depth: u32,
    /// Whether audit events are recorded at all.
    pub record_events: bool,
    /// Retained events; further events are counted but dropped.
    pub event_capacity: usize,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            record_events: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid realm config: {0}")]
    Parse(String),
    #[error("max_call_depth must be greater than zero")]
    ZeroCallDepth,
    #[error("event_capacity must be greater than zero when events are recorded")]
    ZeroEventCapacity,
}

impl RealmConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_call_depth == 0 {
            return Err(ConfigError::ZeroCallDepth);
        }
        if self.record_events && self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        Ok(())
    }

    /// Config with event recording turned off.
    pub fn quiet() -> Self {
        Self {
            record_events: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RealmConfig::default();
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
        assert!(config.record_events);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_json_fills_missing_fields() {
        let config = RealmConfig::from_json(r#"{"max_call_depth": 16}"#).unwrap();
        assert_eq!(config.max_call_depth, 16);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn from_json_rejects_zero_depth() {
        assert_eq!(
            RealmConfig::from_json(r#"{"max_call_depth": 0}"#),
            Err(ConfigError::ZeroCallDepth)
        );
    }

    #[test]
    fn zero_capacity_only_matters_when_recording() {
        assert_eq!(
            RealmConfig::from_json(r#"{"event_capacity": 0}"#),
            Err(ConfigError::ZeroEventCapacity)
        );
        let quiet = RealmConfig::from_json(r#"{"event_capacity": 0, "record_events": false}"#);
        assert!(quiet.is_ok());
    }

    #[test]
    fn from_json_reports_parse_errors() {
        assert!(matches!(
            RealmConfig::from_json("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn quiet_disables_events() {
        assert!(!RealmConfig::quiet().record_events);
    }
}
