//! Configuration for the realtime layer
//!
//! Loads configuration from realtime.toml at startup. All timing knobs
//! (backoff, typing timeout, poll interval) are configurable to avoid
//! hardcoded constants.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Realtime layer configuration
///
/// Loaded from realtime.toml at startup, or built in code by the
/// composition root. Missing file means defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RealtimeConfig {
    /// HTTP API base URL; the socket URL is derived from it
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Authentication token carried as a query parameter on the socket URL
    #[serde(default)]
    pub token: String,

    /// Maximum automatic reconnect attempts before giving up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// First reconnect delay in milliseconds (doubles per attempt)
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Ceiling on the reconnect delay in milliseconds
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,

    /// Dial timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Typing indicator auto-stop window in milliseconds
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,

    /// Connection observer re-sample interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            token: String::new(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            typing_timeout_ms: default_typing_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_api_base_url() -> String {
    "https://api.carlink.app".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_cap_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_typing_timeout_ms() -> u64 {
    3_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

impl RealtimeConfig {
    /// Load configuration from realtime.toml
    ///
    /// If the file doesn't exist, returns default configuration.
    /// # Errors
    /// Returns error if file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("REALTIME_CONFIG_PATH").unwrap_or_else(|_| "realtime.toml".to_string());

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => {
                let config: RealtimeConfig =
                    toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RealtimeConfig::default()),
            Err(e) => Err(ConfigError::IoError(e)),
        }
    }

    /// Derive the socket URL from the API base URL
    ///
    /// Swaps the scheme (`http` -> `ws`, `https` -> `wss`) and appends the
    /// auth token as a `token` query parameter. Existing `ws`/`wss` schemes
    /// pass through unchanged.
    pub fn socket_url(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.api_base_url, e)))?;

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            "ws" => "ws",
            "wss" => "wss",
            other => {
                return Err(ConfigError::InvalidUrl(format!(
                    "unsupported scheme '{}' in {}",
                    other, self.api_base_url
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::InvalidUrl(format!("cannot set scheme on {}", url)))?;

        if !self.token.is_empty() {
            url.query_pairs_mut().append_pair("token", &self.token);
        }

        Ok(url)
    }

    #[inline]
    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    #[inline]
    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_ms, 1_000);
        assert_eq!(config.reconnect_cap_ms, 30_000);
        assert_eq!(config.typing_timeout_ms, 3_000);
        assert_eq!(config.poll_interval_ms, 5_000);
    }

    #[test]
    fn test_socket_url_https_to_wss() {
        let config = RealtimeConfig {
            api_base_url: "https://api.carlink.app".to_string(),
            token: "abc123".to_string(),
            ..Default::default()
        };

        let url = config.socket_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("api.carlink.app"));
        assert_eq!(url.query(), Some("token=abc123"));
    }

    #[test]
    fn test_socket_url_http_to_ws() {
        let config = RealtimeConfig {
            api_base_url: "http://localhost:3000".to_string(),
            ..Default::default()
        };

        let url = config.socket_url().unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(3000));
        // No token configured, no query string
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_socket_url_preserves_path() {
        let config = RealtimeConfig {
            api_base_url: "https://api.carlink.app/v2".to_string(),
            ..Default::default()
        };

        let url = config.socket_url().unwrap();
        assert_eq!(url.path(), "/v2");
    }

    #[test]
    fn test_socket_url_rejects_unknown_scheme() {
        let config = RealtimeConfig {
            api_base_url: "ftp://api.carlink.app".to_string(),
            ..Default::default()
        };

        assert!(config.socket_url().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: RealtimeConfig = toml::from_str(
            r#"
            api_base_url = "https://staging.carlink.app"
            max_reconnect_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://staging.carlink.app");
        assert_eq!(config.max_reconnect_attempts, 3);
        // Unspecified fields fall back to defaults
        assert_eq!(config.reconnect_base_ms, 1_000);
    }
}
