//! Configuration management module
//!
//! Handles loading, validation, and management of application configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Remote ids authorized at startup
    #[serde(default)]
    pub allowed_remote_ids: Vec<String>,

    /// Signaling server configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Per-session negotiation settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// WebSocket URL of the signaling relay
    pub server_url: String,

    /// Authentication token presented on connect
    pub token: String,

    /// Seconds to wait for the server greeting
    pub connect_timeout_secs: u64,

    /// Maximum connection attempts before giving up
    pub max_connect_attempts: u32,

    /// Initial backoff between connection attempts in milliseconds
    pub reconnect_interval_ms: u64,
}

/// ICE server entry handed to every negotiation engine
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateNetworkPolicy {
    #[default]
    All,
    LowCost,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub ice_servers: Vec<IceServer>,
    pub candidate_network_policy: CandidateNetworkPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level
    pub level: String,

    /// Optional path of a daily-rolling log file
    pub file_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_remote_ids: Vec::new(),
            signaling: SignalingConfig::default(),
            client: ClientConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8095/signaling".to_string(),
            token: String::new(),
            connect_timeout_secs: 10,
            max_connect_attempts: 5,
            reconnect_interval_ms: 500,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                ..IceServer::default()
            }],
            candidate_network_policy: CandidateNetworkPolicy::All,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        // PEERCHAT_ALLOWED_REMOTE_IDS - comma-separated list of remote ids
        if let Ok(ids) = env::var("PEERCHAT_ALLOWED_REMOTE_IDS") {
            self.allowed_remote_ids = ids
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(server_url) = env::var("PEERCHAT_SIGNALING_SERVER_URL") {
            self.signaling.server_url = server_url;
        }

        if let Ok(token) = env::var("PEERCHAT_SIGNALING_TOKEN") {
            self.signaling.token = token;
        }

        if let Ok(timeout) = env::var("PEERCHAT_SIGNALING_CONNECT_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.signaling.connect_timeout_secs = value;
            }
        }

        if let Ok(attempts) = env::var("PEERCHAT_SIGNALING_MAX_CONNECT_ATTEMPTS") {
            if let Ok(value) = attempts.parse::<u32>() {
                self.signaling.max_connect_attempts = value;
            }
        }

        if let Ok(interval) = env::var("PEERCHAT_SIGNALING_RECONNECT_INTERVAL_MS") {
            if let Ok(value) = interval.parse::<u64>() {
                self.signaling.reconnect_interval_ms = value;
            }
        }

        if let Ok(level) = env::var("PEERCHAT_LOG_LEVEL") {
            self.log.level = level;
        }

        // PEERCHAT_LOG_FILE_PATH - empty value disables file logging
        if let Ok(file_path) = env::var("PEERCHAT_LOG_FILE_PATH") {
            self.log.file_path = if file_path.trim().is_empty() {
                None
            } else {
                Some(file_path)
            };
        }
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_else(|err| {
            tracing::warn!("Failed to load config: {}, using defaults", err);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.signaling.server_url.trim().is_empty() {
            anyhow::bail!("signaling.server_url must not be empty");
        }

        if !self.signaling.server_url.starts_with("ws://")
            && !self.signaling.server_url.starts_with("wss://")
        {
            anyhow::bail!(
                "signaling.server_url must be a ws:// or wss:// URL: {}",
                self.signaling.server_url
            );
        }

        if self.signaling.connect_timeout_secs == 0 {
            anyhow::bail!("signaling.connect_timeout_secs must be greater than 0");
        }

        if self.signaling.max_connect_attempts == 0 {
            anyhow::bail!("signaling.max_connect_attempts must be greater than 0");
        }

        for server in &self.client.ice_servers {
            if server.urls.is_empty() {
                anyhow::bail!("ICE server entries need at least one url");
            }
        }

        for id in &self.allowed_remote_ids {
            if id.trim().is_empty() {
                anyhow::bail!("Allowed remote ids must not be empty");
            }
        }

        Ok(())
    }

    /// Display formatted configuration
    pub fn display(&self) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        println!("Current configuration:");
        println!("{}", content);
        Ok(())
    }

    /// Display configuration management help
    pub fn display_help() -> Result<()> {
        println!("Configuration management commands:");
        println!("  peerchat config show    - Show current configuration");
        println!("  peerchat config reset   - Write default configuration");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.allowed_remote_ids.is_empty());
        assert_eq!(
            config.client.candidate_network_policy,
            CandidateNetworkPolicy::All
        );
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let mut config = Config::default();
        config.signaling.server_url = "http://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.allowed_remote_ids = vec!["bob".to_string()];
        config.client.candidate_network_policy = CandidateNetworkPolicy::LowCost;

        let serialized = toml::to_string(&config).unwrap();
        assert!(serialized.contains("low-cost"));
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(config.allowed_remote_ids, deserialized.allowed_remote_ids);
        assert_eq!(
            deserialized.client.candidate_network_policy,
            CandidateNetworkPolicy::LowCost
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            allowed_remote_ids = ["bob", "carol"]

            [signaling]
            server_url = "wss://signal.example.com/ws"
            "#,
        )
        .unwrap();
        assert_eq!(config.signaling.max_connect_attempts, 5);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.allowed_remote_ids.len(), 2);
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();

        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.signaling.server_url, loaded_config.signaling.server_url);
    }
}
