//! Relay configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; `from_vars` takes a plain map so tests can construct configs
//! without touching the process environment.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:5000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default grace period between a `kicked` notice and the forced close.
pub const DEFAULT_KICK_GRACE_MS: u64 = 500;

/// Roomlink relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// WebSocket server bind address (default: "0.0.0.0:5000").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Grace period between notifying a kicked member and closing its
    /// channel, so the notice can flush (default: 500ms).
    pub kick_grace: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            health_bind_address: DEFAULT_HEALTH_BIND_ADDRESS.to_string(),
            kick_grace: Duration::from_millis(DEFAULT_KICK_GRACE_MS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("RELAY_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RELAY_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let kick_grace_ms = match vars.get("RELAY_KICK_GRACE_MS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: "RELAY_KICK_GRACE_MS".to_string(),
                message: e.to_string(),
            })?,
            None => DEFAULT_KICK_GRACE_MS,
        };

        Ok(Self {
            bind_address,
            health_bind_address,
            kick_grace: Duration::from_millis(kick_grace_ms),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_vars() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.kick_grace, Duration::from_millis(DEFAULT_KICK_GRACE_MS));
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("RELAY_KICK_GRACE_MS".to_string(), "25".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:0");
        assert_eq!(config.kick_grace, Duration::from_millis(25));
    }

    #[test]
    fn test_invalid_grace_is_rejected() {
        let vars = HashMap::from([("RELAY_KICK_GRACE_MS".to_string(), "soon".to_string())]);
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
