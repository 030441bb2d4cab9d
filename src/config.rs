use std::str::FromStr;
use std::time::Duration;

use crate::framing::{FramingMode, DEFAULT_MAX_MESSAGE_BYTES};
use crate::health::HealthConfig;
use crate::notifications::NotificationConfig;

/// Default interval between host-loop housekeeping ticks (1 second).
const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
    pub framing: FramingMode,
    pub max_message_bytes: usize,
    pub health_enabled: bool,
    pub health: HealthConfig,
    pub tick_interval: Duration,
    pub notifications: NotificationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: None,
            framing: FramingMode::default(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            health_enabled: true,
            health: HealthConfig::default(),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            notifications: NotificationConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment.
    ///
    /// - `MCP_SERVER_NAME`, `MCP_SERVER_VERSION`, `MCP_INSTRUCTIONS`: identity
    ///   reported in the `initialize` result
    /// - `MCP_FRAMING` (`newline` | `content-length`, default `newline`)
    /// - `MCP_MAX_MESSAGE_BYTES` (default 4 MiB)
    /// - `MCP_HEALTH_ENABLED` (default `true`)
    /// - `MCP_PING_INTERVAL_SECS` (30), `MCP_PING_TIMEOUT_SECS` (10),
    ///   `MCP_MAX_FAILED_PINGS` (3)
    /// - `MCP_TICK_INTERVAL_MS` (1000)
    /// - `MCP_NOTIFICATION_MAX_RETRIES` (3)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(name) = lookup("MCP_SERVER_NAME") {
            config.name = name;
        }
        if let Some(version) = lookup("MCP_SERVER_VERSION") {
            config.version = version;
        }
        config.instructions = lookup("MCP_INSTRUCTIONS").filter(|s| !s.trim().is_empty());

        if let Some(raw) = lookup("MCP_FRAMING") {
            config.framing = raw.parse().map_err(|_| ConfigError::Invalid {
                var: "MCP_FRAMING",
                value: raw.clone(),
                expected: "`newline` or `content-length`",
            })?;
        }
        if let Some(bytes) = parse_var::<usize>(&lookup, "MCP_MAX_MESSAGE_BYTES", "a positive integer", false)? {
            config.max_message_bytes = bytes;
        }
        if let Some(raw) = lookup("MCP_HEALTH_ENABLED") {
            config.health_enabled = parse_bool(&raw).ok_or(ConfigError::Invalid {
                var: "MCP_HEALTH_ENABLED",
                value: raw.clone(),
                expected: "a boolean",
            })?;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MCP_PING_INTERVAL_SECS", "a positive integer", false)? {
            config.health.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MCP_PING_TIMEOUT_SECS", "a positive integer", false)? {
            config.health.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "MCP_MAX_FAILED_PINGS", "a positive integer", false)? {
            config.health.max_failed_pings = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MCP_TICK_INTERVAL_MS", "a positive integer", false)? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, "MCP_NOTIFICATION_MAX_RETRIES", "a non-negative integer", true)? {
            config.notifications.max_retries = n;
        }

        Ok(config)
    }
}

/// Parse a numeric variable. Zero is rejected unless `allow_zero`.
fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
    allow_zero: bool,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let invalid = || ConfigError::Invalid {
        var,
        value: raw.clone(),
        expected,
    };
    let value: T = raw.trim().parse().map_err(|_| invalid())?;
    if !allow_zero && value == T::default() {
        return Err(invalid());
    }
    Ok(Some(value))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.framing, FramingMode::NewlineDelimited);
        assert_eq!(config.health.ping_interval, Duration::from_secs(30));
        assert_eq!(config.health.ping_timeout, Duration::from_secs(10));
        assert_eq!(config.health.max_failed_pings, 3);
        assert_eq!(config.notifications.max_retries, 3);
        assert!(config.health_enabled);
        assert!(config.instructions.is_none());
    }

    #[test]
    fn reads_overrides() {
        let config = load(&[
            ("MCP_SERVER_NAME", "indexer"),
            ("MCP_FRAMING", "content-length"),
            ("MCP_PING_INTERVAL_SECS", "5"),
            ("MCP_HEALTH_ENABLED", "false"),
            ("MCP_NOTIFICATION_MAX_RETRIES", "0"),
        ])
        .unwrap();
        assert_eq!(config.name, "indexer");
        assert_eq!(config.framing, FramingMode::ContentLength);
        assert_eq!(config.health.ping_interval, Duration::from_secs(5));
        assert!(!config.health_enabled);
        assert_eq!(config.notifications.max_retries, 0);
    }

    #[test]
    fn rejects_malformed_values() {
        let err = load(&[("MCP_PING_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("MCP_PING_TIMEOUT_SECS"));
        assert!(load(&[("MCP_FRAMING", "xml")]).is_err());
        assert!(load(&[("MCP_TICK_INTERVAL_MS", "0")]).is_err());
        assert!(load(&[("MCP_MAX_FAILED_PINGS", "0")]).is_err());
    }
}
