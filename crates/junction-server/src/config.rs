//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`junction.toml`, `/etc/junction/junction.toml`,
//!   `~/.config/junction/junction.toml`, or the path in `JUNCTION_CONFIG`)
//! - Environment variables (`JUNCTION__PORT`, `JUNCTION__ROUTER__STRICT_URI`, ...)

use anyhow::{bail, Context, Result};
use junction_core::{RealmConfig, RouterConfig};
use junction_protocol::codec::MAX_MESSAGE_SIZE;
use junction_protocol::Serialization;
use junction_transport::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "JUNCTION_CONFIG";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Router configuration.
    #[serde(default)]
    pub router: RouterSection,

    /// Realms created at startup.
    #[serde(default)]
    pub realms: Vec<RealmConfig>,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Status endpoint configuration.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Apply strict URI rules to realm URIs.
    #[serde(default)]
    pub strict_uri: bool,

    /// Time a new connection has to send HELLO, in milliseconds.
    #[serde(default = "default_hello_timeout")]
    pub hello_timeout_ms: u64,

    /// Template for realms created on demand. Unset disables it.
    #[serde(default)]
    pub auto_realm: Option<RealmConfig>,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Accepted serializers, in order of preference (`json`, `msgpack`).
    #[serde(default = "default_serializers")]
    pub serializers: Vec<String>,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Time a new connection has to complete the WebSocket upgrade, in
    /// milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Status endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Serve `/health` and `/realms`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Status port.
    #[serde(default = "default_http_port")]
    pub port: u16,
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
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_hello_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_serializers() -> Vec<String> {
    Serialization::ALL.iter().map(ToString::to_string).collect()
}

fn default_max_message_size() -> usize {
    MAX_MESSAGE_SIZE
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_http_port() -> u16 {
    8081
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            router: RouterSection::default(),
            realms: Vec::new(),
            transport: TransportConfig::default(),
            http: HttpConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            strict_uri: false,
            hello_timeout_ms: default_hello_timeout(),
            auto_realm: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            serializers: default_serializers(),
            max_message_size: default_max_message_size(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_http_port(),
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
    /// Load configuration from the first config file found, overlaid with
    /// `JUNCTION__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        match Self::find_file() {
            Some(path) => Self::from_file(path),
            None => Self::build(None),
        }
    }

    /// Load configuration from a specific file, overlaid with `JUNCTION__*`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }
        tracing::info!("Loading configuration from {}", path.display());
        Self::build(Some(path))
            .with_context(|| format!("Failed to load config file: {}", path.display()))
    }

    fn build(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("JUNCTION")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        // Try to load from default paths
        let config_paths = [
            "junction.toml",
            "/etc/junction/junction.toml",
            "~/.config/junction/junction.toml",
        ];

        config_paths
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Get the socket address to bind the WAMP listener to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    /// Get the socket address for the status endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn http_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.http.port)
    }

    /// Router settings.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            strict_uri: self.router.strict_uri,
            auto_realm: self.router.auto_realm.clone(),
            hello_timeout: Duration::from_millis(self.router.hello_timeout_ms),
            ..Default::default()
        }
    }

    /// WebSocket listener settings.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid bind address or serializer list.
    pub fn websocket_config(&self) -> Result<WebSocketConfig> {
        Ok(WebSocketConfig {
            bind_addr: self.bind_addr()?,
            max_message_size: self.transport.max_message_size,
            serializations: self.serializations()?,
            handshake_timeout: Duration::from_millis(self.transport.handshake_timeout_ms),
        })
    }

    /// Accepted serializations, in configured order.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown serializer name or an empty list.
    pub fn serializations(&self) -> Result<Vec<Serialization>> {
        let mut serializations = Vec::new();
        for name in &self.transport.serializers {
            let serialization = Serialization::ALL
                .into_iter()
                .find(|s| s.to_string() == name.as_str())
                .with_context(|| format!("Unknown serializer: {}", name))?;
            if !serializations.contains(&serialization) {
                serializations.push(serialization);
            }
        }

        if serializations.is_empty() {
            bail!("No serializers configured");
        }
        Ok(serializations)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid host:port {}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(config.realms.is_empty());
        assert!(config.router.auto_realm.is_none());
        assert_eq!(config.router.hello_timeout_ms, 5_000);
        assert_eq!(
            config.serializations().unwrap(),
            vec![Serialization::Json, Serialization::MsgPack]
        );
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);
        assert_eq!(config.http_addr().unwrap().port(), 8081);

        let config = Config {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [router]
            strict_uri = true
            hello_timeout_ms = 2500

            [router.auto_realm]
            anonymous_role = "guest"

            [[realms]]
            uri = "com.example.app"

            [[realms]]
            uri = "com.example.admin"
            anonymous_auth = false

            [transport]
            serializers = ["msgpack"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.realms.len(), 2);
        assert!(config.realms[0].anonymous_auth);
        assert!(!config.realms[1].anonymous_auth);
        assert_eq!(config.serializations().unwrap(), vec![Serialization::MsgPack]);

        let router = config.router_config();
        assert!(router.strict_uri);
        assert_eq!(router.hello_timeout, Duration::from_millis(2500));
        assert_eq!(router.auto_realm.unwrap().anonymous_role, "guest");
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("junction-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
                port = 9100

                [[realms]]
                uri = "com.example.app"

                [transport]
                handshake_timeout_ms = 250
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.realms[0].uri.as_str(), "com.example.app");
        assert_eq!(
            config.websocket_config().unwrap().handshake_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_from_missing_file() {
        let path = std::env::temp_dir().join("junction-does-not-exist.toml");
        assert!(Config::from_file(path).is_err());
    }

    #[test]
    fn test_unknown_serializer() {
        let config = Config {
            transport: TransportConfig {
                serializers: vec!["cbor".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.serializations().is_err());
    }
}
