//! # Configuration Management
//!
//! Centralized configuration for both handshake endpoints.
//!
//! This module provides structured configuration for servers and clients,
//! including slot counts, handshake timeouts, keep-alive cadence, replay
//! protection sizing and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Security Considerations
//! - `mode = "insecure"` enables tokenless connects and is reported as a
//!   validation warning; production deployments must stay `secure`
//! - Replay cache TTL should outlive the longest connect token lifetime

use crate::core::{ConnectMode, WireContext, MAX_CLIENTS_LIMIT};
use crate::error::{ProtocolError, Result};
use crate::utils::time;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default number of client slots
pub const DEFAULT_MAX_CLIENTS: u32 = 64;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    /// Secure (token only) or insecure (development) connects
    #[serde(default)]
    pub mode: ConnectMode,

    /// Number of client slots; bounds `clientIndex` on the wire
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,

    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Parse an optional numeric override; a set but unparsable value is an error
fn env_override<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ProtocolError::ConfigError(format!("Invalid {name}: '{raw}' (expected a number)"))
        }),
        Err(_) => Ok(None),
    }
}

fn default_max_clients() -> u32 {
    DEFAULT_MAX_CLIENTS
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            mode: ConnectMode::Secure,
            max_clients: DEFAULT_MAX_CLIENTS,
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ProtocolConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var("HANDSHAKE_PROTOCOL_MODE") {
            config.mode = match mode.to_ascii_lowercase().as_str() {
                "secure" => ConnectMode::Secure,
                "insecure" => ConnectMode::Insecure,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "Invalid HANDSHAKE_PROTOCOL_MODE: '{other}' (expected 'secure' or 'insecure')"
                    )))
                }
            };
        }

        if let Some(val) = env_override::<u32>("HANDSHAKE_PROTOCOL_MAX_CLIENTS")? {
            config.max_clients = val;
        }

        if let Ok(addr) = std::env::var("HANDSHAKE_PROTOCOL_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Some(val) = env_override::<u64>("HANDSHAKE_PROTOCOL_CONNECTION_TIMEOUT_MS")? {
            config.server.connection_timeout = Duration::from_millis(val);
            config.client.connection_timeout = Duration::from_millis(val);
        }

        if let Some(val) = env_override::<u64>("HANDSHAKE_PROTOCOL_KEEPALIVE_INTERVAL_MS")? {
            config.server.keepalive_interval = Duration::from_millis(val);
            config.client.keepalive_interval = Duration::from_millis(val);
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Wire parameters derived from this configuration
    pub fn wire_context(&self) -> WireContext {
        WireContext::new(self.max_clients, self.mode)
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_clients == 0 {
            errors.push("Max clients must be greater than 0".to_string());
        } else if self.max_clients > MAX_CLIENTS_LIMIT {
            errors.push(format!(
                "Max clients too large: {} (maximum: {MAX_CLIENTS_LIMIT})",
                self.max_clients
            ));
        }

        if self.mode == ConnectMode::Insecure {
            errors.push(
                "WARNING: Insecure connect is enabled - development only, never in production"
                    .to_string(),
            );
        }

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.logging.validate());

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:40000")
    pub address: String,

    /// How long an issued challenge waits for its response
    #[serde(with = "duration_serde")]
    pub challenge_timeout: Duration,

    /// Silence after which a connected client is dropped
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Interval between keep-alives to connected clients
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,

    /// How long a connect token nonce stays bound to its first address
    #[serde(with = "duration_serde")]
    pub replay_cache_ttl: Duration,

    /// Maximum tracked connect token nonces
    pub replay_cache_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:40000"),
            challenge_timeout: time::CHALLENGE_TIMEOUT,
            connection_timeout: time::CONNECTION_TIMEOUT,
            keepalive_interval: time::KEEPALIVE_INTERVAL,
            replay_cache_ttl: Duration::from_secs(60),
            replay_cache_capacity: 10_000,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:40000')",
                self.address
            ));
        }

        if self.challenge_timeout.as_millis() < 100 {
            errors.push("Challenge timeout too short (minimum: 100ms)".to_string());
        } else if self.challenge_timeout.as_secs() > 60 {
            errors.push("Challenge timeout too long (maximum: 60s)".to_string());
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        if self.keepalive_interval.as_millis() < 10 {
            errors.push("Keep-alive interval too short (minimum: 10ms)".to_string());
        } else if self.keepalive_interval >= self.connection_timeout {
            errors.push("Keep-alive interval must be shorter than connection timeout".to_string());
        }

        if self.replay_cache_capacity == 0 {
            errors.push("Replay cache capacity must be greater than 0".to_string());
        }

        if self.replay_cache_ttl.as_secs() < 1 {
            errors.push("Replay cache TTL too short (minimum: 1s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Resend cadence for the current handshake packet
    #[serde(with = "duration_serde")]
    pub resend_interval: Duration,

    /// How long one handshake stage may go unanswered
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Silence after which an established connection is dropped
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Interval between keep-alives to the server
    #[serde(with = "duration_serde")]
    pub keepalive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            resend_interval: time::RESEND_INTERVAL,
            connect_timeout: time::CONNECT_TIMEOUT,
            connection_timeout: time::CONNECTION_TIMEOUT,
            keepalive_interval: time::KEEPALIVE_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.resend_interval.as_millis() < 10 {
            errors.push("Resend interval too short (minimum: 10ms)".to_string());
        } else if self.resend_interval >= self.connect_timeout {
            errors.push("Resend interval must be shorter than connect timeout".to_string());
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 60 {
            errors.push("Connect timeout too long (maximum: 60s)".to_string());
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.keepalive_interval.as_millis() < 10 {
            errors.push("Keep-alive interval too short (minimum: 10ms)".to_string());
        } else if self.keepalive_interval >= self.connection_timeout {
            errors.push("Keep-alive interval must be shorter than connection timeout".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("handshake-protocol"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{ser, Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).map_err(ser::Error::custom)?;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
