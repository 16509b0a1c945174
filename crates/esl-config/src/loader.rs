//! Locates the bridge config file and layers `ESL_BRIDGE_*` overrides on top

use crate::{AppConfig, ConfigError, SwitchConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Searched in order when no explicit path is given
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "esl-bridge.toml",
    "./config/esl-bridge.toml",
    "/etc/esl-bridge/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Prefer `path` over the search list when it exists
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Defaults, then the first config file found, then the environment
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config)?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("ESL_BRIDGE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) -> Result<(), ConfigError> {
        // Web
        if let Ok(val) = env::var("ESL_BRIDGE_WEB_HOST") {
            config.web.host = val;
        }
        if let Ok(val) = env::var("ESL_BRIDGE_WEB_PORT") {
            if let Ok(port) = val.parse() {
                config.web.port = port;
            }
        }
        if let Ok(val) = env::var("ESL_BRIDGE_WEB_MOUNT") {
            config.web.mount = val;
        }

        // Switches replace the file list entirely
        if let Ok(val) = env::var("ESL_BRIDGE_SWITCHES") {
            config.switches = parse_switches(&val)?;
        }

        // Supervisor
        if let Ok(val) = env::var("ESL_BRIDGE_RECONNECT_MODE") {
            config.supervisor.reconnect.mode = val.parse()?;
        }
        if let Ok(val) = env::var("ESL_BRIDGE_RECONNECT_THRESHOLD_SECS") {
            if let Ok(secs) = val.parse() {
                config.supervisor.reconnect.threshold_secs = secs;
            }
        }

        // Calls
        if let Ok(val) = env::var("ESL_BRIDGE_MAX_CALLS") {
            if let Ok(max) = val.parse() {
                config.calls.max_calls = max;
            }
        }
        if let Ok(val) = env::var("ESL_BRIDGE_EVICTION") {
            config.calls.eviction = val.parse()?;
        }

        Ok(())
    }
}

/// Parse a `host:port:password` list separated by commas.
///
/// Port and password may be omitted and fall back to the defaults.
pub fn parse_switches(value: &str) -> Result<Vec<SwitchConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let defaults = SwitchConfig::default();

            let host = parts.next().unwrap_or_default().to_string();
            if host.is_empty() {
                return Err(ConfigError::EnvError(format!("switch entry '{}' has no host", entry)));
            }

            let port = match parts.next() {
                Some(port) if !port.is_empty() => port.parse().map_err(|_| {
                    ConfigError::EnvError(format!("switch entry '{}' has an invalid port", entry))
                })?,
                _ => defaults.port,
            };

            let password = parts
                .next()
                .map(str::to_string)
                .unwrap_or(defaults.password);

            Ok(SwitchConfig { host, port, password })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switches() {
        let switches = parse_switches("10.0.0.1:8021:secret, 10.0.0.2,fs3:9000").unwrap();

        assert_eq!(switches.len(), 3);
        assert_eq!(
            switches[0],
            SwitchConfig {
                host: "10.0.0.1".to_string(),
                port: 8021,
                password: "secret".to_string(),
            }
        );
        assert_eq!(switches[1].port, 8021);
        assert_eq!(switches[1].password, "ClueCon");
        assert_eq!(switches[2].port, 9000);
    }

    #[test]
    fn test_parse_switches_password_may_contain_colons() {
        let switches = parse_switches("fs1:8021:a:b:c").unwrap();
        assert_eq!(switches[0].password, "a:b:c");
    }

    #[test]
    fn test_parse_switches_rejects_bad_port() {
        assert!(parse_switches("fs1:notaport").is_err());
        assert!(parse_switches(":8021").is_err());
    }

    #[test]
    fn test_explicit_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            "[web]\nport = 9100\n\n[[switches]]\nhost = \"fs-a\"\n",
        )
        .unwrap();

        let config = ConfigLoader::with_path(&path).load().unwrap();
        assert_eq!(config.web.port, 9100);
        assert_eq!(config.switches[0].host, "fs-a");
    }
}
