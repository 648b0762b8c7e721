//! Configuration loading.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. Built-in defaults (see [`crate::constants`])
//! 2. `config.json` in the config directory
//! 3. `FLEXPROBE_*` environment variables
//!
//! The config directory is `FLEXPROBE_CONFIG_DIR` if set, otherwise the
//! platform config dir (macOS: ~/Library/Application Support/flexprobe).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::constants;

/// Configuration for discovery and sessions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// UDP port to listen on for beacons.
    pub discovery_port: u16,
    /// TCP port of the command API, used when the beacon doesn't advertise one.
    pub session_port: u16,
    /// Seconds to wait for a discovery beacon.
    pub discovery_timeout_secs: u64,
    /// Consecutive UDP receive errors tolerated during discovery.
    pub max_discovery_errors: u32,
    /// Milliseconds to wait for a command reply.
    pub command_timeout_ms: u64,
    /// Longest inbound line accepted before the stream is declared malformed.
    pub max_line_len: usize,
    /// Sequence id given to the first command of a session.
    pub first_sequence: u32,
    /// Queue depth per status subscriber.
    pub subscriber_queue_capacity: usize,
    /// Queue depth for unrecognized lines.
    pub diagnostic_queue_capacity: usize,
    /// Command sent when the session closes.
    pub disconnect_command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: constants::DISCOVERY_PORT,
            session_port: constants::SESSION_PORT,
            discovery_timeout_secs: constants::DISCOVERY_TIMEOUT.as_secs(),
            max_discovery_errors: constants::MAX_DISCOVERY_ERRORS,
            command_timeout_ms: constants::COMMAND_TIMEOUT.as_millis() as u64,
            max_line_len: constants::MAX_LINE_LEN,
            first_sequence: constants::FIRST_SEQUENCE,
            subscriber_queue_capacity: constants::SUBSCRIBER_QUEUE_CAPACITY,
            diagnostic_queue_capacity: constants::DIAGNOSTIC_QUEUE_CAPACITY,
            disconnect_command: constants::DISCONNECT_COMMAND.to_string(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// Directory selection priority:
    /// 1. `FLEXPROBE_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir joined with `flexprobe`
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("FLEXPROBE_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("flexprobe"))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file is not an error; a file that exists but doesn't parse is.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load a config file without applying environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `FLEXPROBE_*` overrides from `lookup`. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse_into<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            slot: &mut T,
        ) {
            if let Some(raw) = lookup(key) {
                match raw.trim().parse::<T>() {
                    Ok(value) => *slot = value,
                    Err(_) => log::warn!("Ignoring {key}={raw:?}: not a valid value"),
                }
            }
        }

        parse_into(&lookup, "FLEXPROBE_DISCOVERY_PORT", &mut self.discovery_port);
        parse_into(&lookup, "FLEXPROBE_SESSION_PORT", &mut self.session_port);
        parse_into(&lookup, "FLEXPROBE_DISCOVERY_TIMEOUT", &mut self.discovery_timeout_secs);
        parse_into(&lookup, "FLEXPROBE_COMMAND_TIMEOUT_MS", &mut self.command_timeout_ms);
        parse_into(&lookup, "FLEXPROBE_MAX_LINE_LEN", &mut self.max_line_len);
        parse_into(&lookup, "FLEXPROBE_FIRST_SEQUENCE", &mut self.first_sequence);
        parse_into(&lookup, "FLEXPROBE_MAX_DISCOVERY_ERRORS", &mut self.max_discovery_errors);
        parse_into(&lookup, "FLEXPROBE_SUBSCRIBER_QUEUE", &mut self.subscriber_queue_capacity);
        parse_into(&lookup, "FLEXPROBE_DIAGNOSTIC_QUEUE", &mut self.diagnostic_queue_capacity);

        if let Some(command) = lookup("FLEXPROBE_DISCONNECT_COMMAND") {
            self.disconnect_command = command;
        }
    }

    /// Discovery deadline.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Default per-command reply deadline.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.discovery_port, 4992);
        assert_eq!(config.session_port, 4992);
        assert_eq!(config.first_sequence, 1);
        assert_eq!(config.command_timeout(), constants::COMMAND_TIMEOUT);
        assert_eq!(config.disconnect_command, "client disconnect");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"session_port": 5000, "command_timeout_ms": 250}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.session_port, 5000);
        assert_eq!(config.command_timeout(), Duration::from_millis(250));
        assert_eq!(config.discovery_port, 4992);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FLEXPROBE_SESSION_PORT", "6000"),
            ("FLEXPROBE_DISCOVERY_PORT", "not-a-port"),
            ("FLEXPROBE_FIRST_SEQUENCE", " 100 "),
            ("FLEXPROBE_DISCONNECT_COMMAND", "client disconnect 0x1234"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.session_port, 6000);
        assert_eq!(config.discovery_port, 4992);
        assert_eq!(config.first_sequence, 100);
        assert_eq!(config.disconnect_command, "client disconnect 0x1234");
    }

    #[test]
    fn test_queue_and_error_limit_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("FLEXPROBE_MAX_DISCOVERY_ERRORS", "3"),
            ("FLEXPROBE_SUBSCRIBER_QUEUE", "1024"),
            ("FLEXPROBE_DIAGNOSTIC_QUEUE", "-1"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(ToString::to_string));

        assert_eq!(config.max_discovery_errors, 3);
        assert_eq!(config.subscriber_queue_capacity, 1024);
        assert_eq!(config.diagnostic_queue_capacity, 64);
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = Config {
            max_line_len: 1024,
            ..Config::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
