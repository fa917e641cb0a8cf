//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (BEACON_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use beacon_core::ClassifierRules;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Verbose logging for development. No behavioral effect on
    /// correctness.
    #[serde(default)]
    pub dev_mode: bool,

    /// WebSocket endpoint path.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Channel classification and client-event policy.
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Application server endpoints and TLS policy.
    #[serde(default)]
    pub app: AppServerConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Channel classification and client-event policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Glob patterns deriving channel kinds and client events.
    #[serde(flatten)]
    pub rules: ClassifierRules,

    /// Client events that relay but never trigger a webhook.
    ///
    /// Meant for low-value high-frequency events such as typing
    /// indicators.
    #[serde(default)]
    pub excluded_client_events: Vec<String>,
}

/// Where the external application server lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppServerConfig {
    /// Base URL for the auth endpoint.
    #[serde(default = "default_app_host")]
    pub auth_host: String,

    /// Auth endpoint path.
    #[serde(default = "default_auth_path")]
    pub auth_endpoint: String,

    /// Base URL for the webhook endpoint.
    #[serde(default = "default_app_host")]
    pub hook_host: String,

    /// Webhook endpoint path. Absent disables webhooks.
    #[serde(default)]
    pub hook_endpoint: Option<String>,

    /// PEM client certificate for mutual TLS, optional.
    #[serde(default)]
    pub ssl_cert_path: Option<String>,

    /// PEM client key for mutual TLS, optional.
    #[serde(default)]
    pub ssl_key_path: Option<String>,

    /// Key passphrase. Encrypted keys are rejected at startup.
    #[serde(default)]
    pub ssl_passphrase: Option<String>,

    /// Trust application endpoints with self-issued certificates.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("BEACON_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("BEACON_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/app".to_string()
}

fn default_app_host() -> String {
    std::env::var("BEACON_APP_HOST").unwrap_or_else(|_| "http://127.0.0.1:3000".to_string())
}

fn default_auth_path() -> String {
    "/beacon/auth".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dev_mode: false,
            websocket_path: default_ws_path(),
            channels: ChannelsConfig::default(),
            app: AppServerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for AppServerConfig {
    fn default() -> Self {
        Self {
            auth_host: default_app_host(),
            auth_endpoint: default_auth_path(),
            hook_host: default_app_host(),
            hook_endpoint: None,
            ssl_cert_path: None,
            ssl_key_path: None,
            ssl_passphrase: None,
            accept_invalid_certs: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

impl AppServerConfig {
    /// Full URL of the auth endpoint.
    #[must_use]
    pub fn auth_url(&self) -> String {
        join_url(&self.auth_host, &self.auth_endpoint)
    }

    /// Full URL of the webhook endpoint, if webhooks are enabled.
    #[must_use]
    pub fn hook_url(&self) -> Option<String> {
        self.hook_endpoint
            .as_ref()
            .map(|path| join_url(&self.hook_host, path))
    }
}

fn join_url(host: &str, path: &str) -> String {
    format!(
        "{}/{}",
        host.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.websocket_path, "/app");
        assert!(!config.dev_mode);
        assert!(config.app.hook_endpoint.is_none());
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_default_channel_rules() {
        let config = Config::default();
        assert_eq!(config.channels.rules.presence, vec!["presence-*"]);
        assert_eq!(config.channels.rules.private, vec!["private-*"]);
        assert_eq!(config.channels.rules.client_events, vec!["client-*"]);
        assert!(config.channels.excluded_client_events.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [channels]
            presence = ["presence-*", "room-*"]
            excluded_client_events = ["client-typing"]

            [app]
            auth_host = "https://app.example.com"
            hook_host = "https://app.example.com"
            hook_endpoint = "/beacon/events"
            accept_invalid_certs = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.channels.rules.presence,
            vec!["presence-*", "room-*"]
        );
        assert_eq!(
            config.channels.excluded_client_events,
            vec!["client-typing"]
        );
        assert_eq!(
            config.app.auth_url(),
            "https://app.example.com/beacon/auth"
        );
        assert_eq!(
            config.app.hook_url().as_deref(),
            Some("https://app.example.com/beacon/events")
        );
        assert!(config.app.accept_invalid_certs);
    }

    #[test]
    fn test_hooks_disabled_without_endpoint() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.app.hook_url().is_none());
    }

    #[test]
    fn test_join_url_handles_slashes() {
        assert_eq!(join_url("http://a/", "/b"), "http://a/b");
        assert_eq!(join_url("http://a", "b"), "http://a/b");
    }
}
