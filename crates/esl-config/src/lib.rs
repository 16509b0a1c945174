//! ESL Bridge Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::{parse_switches, ConfigLoader};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub web: WebConfig,
    pub switches: Vec<SwitchConfig>,
    pub supervisor: SupervisorConfig,
    pub calls: CallStoreSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            web: WebConfig::default(),
            switches: Vec::new(),
            supervisor: SupervisorConfig::default(),
            calls: CallStoreSettings::default(),
        }
    }
}

/// HTTP / pub-sub server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    /// Path of the WebSocket pub/sub endpoint
    pub mount: String,
    /// Per-channel buffer; slower subscribers skip messages beyond this
    pub channel_capacity: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            mount: "/pubsub".to_string(),
            channel_capacity: 256,
        }
    }
}

/// One upstream event socket server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8021,
            password: "ClueCon".to_string(),
        }
    }
}

/// Connection supervision settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Reconnect-check sweep cadence
    pub check_interval_secs: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// How long a switch may stay silent before a reconnect is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// Same threshold around the clock
    Fixed,
    /// Shorter threshold during the daytime window
    Daytime,
}

impl std::str::FromStr for ReconnectMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(ReconnectMode::Fixed),
            "daytime" => Ok(ReconnectMode::Daytime),
            other => Err(ConfigError::EnvError(format!("unknown reconnect mode: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub mode: ReconnectMode,
    /// Threshold in `fixed` mode
    pub threshold_secs: u64,
    pub day_start_hour: u32,
    pub day_end_hour: u32,
    pub day_threshold_secs: u64,
    pub night_threshold_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            mode: ReconnectMode::Fixed,
            threshold_secs: 300,
            day_start_hour: 8,
            day_end_hour: 20,
            day_threshold_secs: 120,
            night_threshold_secs: 300,
        }
    }
}

/// How the call store sheds records when it is over capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    LeastRecentlyUpdated,
    Random,
}

impl std::str::FromStr for EvictionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "least_recently_updated" | "lru" => Ok(EvictionMode::LeastRecentlyUpdated),
            "random" => Ok(EvictionMode::Random),
            other => Err(ConfigError::EnvError(format!("unknown eviction mode: {}", other))),
        }
    }
}

/// Call correlation store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallStoreSettings {
    pub maintenance_interval_secs: u64,
    /// Answered calls without a hangup are dropped after this
    pub answered_ttl_secs: u64,
    /// Calls that never got answered are dropped after this
    pub unanswered_ttl_secs: u64,
    pub max_calls: usize,
    pub eviction: EvictionMode,
}

impl Default for CallStoreSettings {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: 20,
            answered_ttl_secs: 2 * 60 * 60,
            unanswered_ttl_secs: 60,
            max_calls: 10_000,
            eviction: EvictionMode::LeastRecentlyUpdated,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    /// Reject configurations the bridge cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.switches.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[switches]] entry is required".to_string(),
            ));
        }
        if let Some(switch) = self.switches.iter().find(|s| s.host.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "switch on port {} has an empty host",
                switch.port
            )));
        }
        if !self.web.mount.starts_with('/') || self.web.mount.len() < 2 {
            return Err(ConfigError::ValidationError(format!(
                "web.mount '{}' must be a path like /pubsub",
                self.web.mount
            )));
        }
        if self.web.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "web.channel_capacity must be positive".to_string(),
            ));
        }
        if self.supervisor.check_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "supervisor.check_interval_secs must be positive".to_string(),
            ));
        }

        let reconnect = &self.supervisor.reconnect;
        if reconnect.mode == ReconnectMode::Daytime
            && !(reconnect.day_start_hour < reconnect.day_end_hour && reconnect.day_end_hour <= 24)
        {
            return Err(ConfigError::ValidationError(format!(
                "daytime window {}..{} is not a valid hour range",
                reconnect.day_start_hour, reconnect.day_end_hour
            )));
        }

        if self.calls.maintenance_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "calls.maintenance_interval_secs must be positive".to_string(),
            ));
        }
        if self.calls.max_calls == 0 {
            return Err(ConfigError::ValidationError(
                "calls.max_calls must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# ESL Bridge Configuration
# Environment variables override these settings

[web]
host = "0.0.0.0"
port = 8000
mount = "/pubsub"
channel_capacity = 256

[[switches]]
host = "10.0.0.11"
port = 8021
password = "ClueCon"

[[switches]]
host = "10.0.0.12"
port = 8021
password = "ClueCon"

[supervisor]
check_interval_secs = 60

[supervisor.reconnect]
mode = "fixed"  # fixed or daytime
threshold_secs = 300
day_start_hour = 8
day_end_hour = 20
day_threshold_secs = 120
night_threshold_secs = 300

[calls]
maintenance_interval_secs = 20
answered_ttl_secs = 7200
unanswered_ttl_secs = 60
max_calls = 10000
eviction = "least_recently_updated"  # least_recently_updated or random
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.web.port, 8000);
        assert_eq!(config.supervisor.check_interval_secs, 60);
        assert_eq!(config.supervisor.reconnect.mode, ReconnectMode::Fixed);
        assert_eq!(config.supervisor.reconnect.threshold_secs, 300);
        assert_eq!(config.calls.maintenance_interval_secs, 20);
        assert_eq!(config.calls.answered_ttl_secs, 7200);
        assert_eq!(config.calls.unanswered_ttl_secs, 60);
        assert_eq!(config.calls.max_calls, 10_000);
    }

    #[test]
    fn test_example_toml_parses() {
        let config: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        assert_eq!(config.switches.len(), 2);
        assert_eq!(config.switches[0].host, "10.0.0.11");
        assert_eq!(config.calls.eviction, EvictionMode::LeastRecentlyUpdated);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[switches]]
host = "fs1.local"

[supervisor.reconnect]
mode = "daytime"

[calls]
eviction = "random"
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.switches[0].port, 8021);
        assert_eq!(config.switches[0].password, "ClueCon");
        assert_eq!(config.supervisor.reconnect.mode, ReconnectMode::Daytime);
        assert_eq!(config.supervisor.reconnect.day_threshold_secs, 120);
        assert_eq!(config.calls.eviction, EvictionMode::Random);
        assert_eq!(config.web.mount, "/pubsub");
    }

    #[test]
    fn test_validate_rejects_missing_switches() {
        let err = AppConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_rejects_bad_daytime_window() {
        let mut config = AppConfig::default();
        config.switches.push(SwitchConfig::default());
        config.supervisor.reconnect.mode = ReconnectMode::Daytime;
        config.supervisor.reconnect.day_start_hour = 20;
        config.supervisor.reconnect.day_end_hour = 8;

        assert!(config.validate().is_err());

        // The window is only checked when it is in use
        config.supervisor.reconnect.mode = ReconnectMode::Fixed;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_mount() {
        let mut config = AppConfig::default();
        config.switches.push(SwitchConfig::default());
        config.web.mount = "pubsub".to_string();
        assert!(config.validate().is_err());

        config.web.mount = "/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("DAYTIME".parse::<ReconnectMode>().unwrap(), ReconnectMode::Daytime);
        assert_eq!("lru".parse::<EvictionMode>().unwrap(), EvictionMode::LeastRecentlyUpdated);
        assert_eq!(
            "least-recently-updated".parse::<EvictionMode>().unwrap(),
            EvictionMode::LeastRecentlyUpdated
        );
        assert!("sometimes".parse::<EvictionMode>().is_err());
    }
}
