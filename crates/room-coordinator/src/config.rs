//! Room coordinator configuration.
//!
//! Configuration is loaded from environment variables with sensible
//! defaults; a `HashMap` loader exists for tests.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default HTTP API bind address.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default grace period before an empty room is reclaimed, in seconds.
pub const DEFAULT_EMPTY_ROOM_GRACE_SECONDS: u64 = 60;

/// Default heartbeat liveness window, in seconds.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 30;

/// Default command enqueue timeout, in milliseconds.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 1000;

/// Default coordinator instance id prefix.
pub const DEFAULT_COORDINATOR_ID_PREFIX: &str = "rc";

/// Room coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API bind address (default: "0.0.0.0:8080").
    pub http_bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this coordinator instance.
    pub coordinator_id: String,

    /// Grace period before an empty, non-ended room is reclaimed.
    pub empty_room_grace_seconds: u64,

    /// Liveness window: sessions silent for longer are treated as
    /// disconnected (implicit leave).
    pub heartbeat_timeout_seconds: u64,

    /// Bound on waiting for a room's mailbox before failing `Timeout`.
    pub command_timeout_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

fn parse_u64(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw.clone())),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let http_bind_address = vars
            .get("RC_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let empty_room_grace_seconds = parse_u64(
            vars,
            "RC_EMPTY_ROOM_GRACE_SECONDS",
            DEFAULT_EMPTY_ROOM_GRACE_SECONDS,
        )?;

        let heartbeat_timeout_seconds = parse_u64(
            vars,
            "RC_HEARTBEAT_TIMEOUT_SECONDS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS,
        )?;

        let command_timeout_ms =
            parse_u64(vars, "RC_COMMAND_TIMEOUT_MS", DEFAULT_COMMAND_TIMEOUT_MS)?;

        // Generate a coordinator instance id unless one is pinned.
        let coordinator_id = vars.get("RC_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_COORDINATOR_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            http_bind_address,
            health_bind_address,
            coordinator_id,
            empty_room_grace_seconds,
            heartbeat_timeout_seconds,
            command_timeout_ms,
        })
    }

    /// Grace period before an empty room is reclaimed.
    #[must_use]
    pub fn empty_room_grace(&self) -> Duration {
        Duration::from_secs(self.empty_room_grace_seconds)
    }

    /// Heartbeat liveness window.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Command enqueue timeout.
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load");

        assert_eq!(config.http_bind_address, DEFAULT_HTTP_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(
            config.empty_room_grace_seconds,
            DEFAULT_EMPTY_ROOM_GRACE_SECONDS
        );
        assert_eq!(
            config.heartbeat_timeout_seconds,
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS
        );
        assert_eq!(config.command_timeout_ms, DEFAULT_COMMAND_TIMEOUT_MS);
        assert!(config.coordinator_id.starts_with("rc-"));
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            (
                "RC_HTTP_BIND_ADDRESS".to_string(),
                "127.0.0.1:9090".to_string(),
            ),
            (
                "RC_HEALTH_BIND_ADDRESS".to_string(),
                "127.0.0.1:9091".to_string(),
            ),
            ("RC_EMPTY_ROOM_GRACE_SECONDS".to_string(), "120".to_string()),
            ("RC_HEARTBEAT_TIMEOUT_SECONDS".to_string(), "15".to_string()),
            ("RC_COMMAND_TIMEOUT_MS".to_string(), "250".to_string()),
            ("RC_ID".to_string(), "rc-custom-001".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load");

        assert_eq!(config.http_bind_address, "127.0.0.1:9090");
        assert_eq!(config.health_bind_address, "127.0.0.1:9091");
        assert_eq!(config.empty_room_grace(), Duration::from_secs(120));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(15));
        assert_eq!(config.command_timeout(), Duration::from_millis(250));
        assert_eq!(config.coordinator_id, "rc-custom-001");
    }

    #[test]
    fn test_from_vars_rejects_garbage_numbers() {
        let vars = HashMap::from([(
            "RC_HEARTBEAT_TIMEOUT_SECONDS".to_string(),
            "soon".to_string(),
        )]);

        let result = Config::from_vars(&vars);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("RC_HEARTBEAT_TIMEOUT_SECONDS", _))
        ));
    }
}
