//! Configuration Module
//!
//! Provides TOML-based configuration for fleetgate with support for:
//! - Operator HTTP API settings
//! - Broker connection and reconnect policy
//! - Time-series store connection and flush cadence
//! - Per-category queue capacities
//! - Dispatch completion mode and malformed topic policy
//! - Device registration forwarding
//! - Environment variable overrides (FLEETGATE__* prefix)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use broker::{BrokerConfig, BrokerProtocol};
pub use metrics::MetricsConfig;
pub use registration::RegistrationConfig;
pub use store::StoreConfig;

use crate::dispatcher::CompletionMode;
use crate::normalizer::MalformedTopicPolicy;

mod broker;
mod metrics;
mod registration;
mod store;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Operator HTTP API
    pub http: HttpConfig,
    /// Broker connection
    pub broker: BrokerConfig,
    /// Time-series store
    pub store: StoreConfig,
    /// Queue capacities per event category
    pub queues: QueueConfig,
    /// Command dispatch policy
    pub dispatch: DispatchConfig,
    /// Telemetry normalizer policy
    pub normalizer: NormalizerConfig,
    /// Device registration forwarding
    pub registration: RegistrationConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Operator HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address
    pub bind: SocketAddr,
    /// Largest accepted request body in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".parse().unwrap(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Bounded queue capacity per event category.
///
/// Download outcomes are sized far above the status categories since one
/// operator request produces one provisional event per target device.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub download: usize,
    pub system_status: usize,
    pub network_status: usize,
    pub health_status: usize,
    pub error_log: usize,
    pub sales: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            download: 1_000_000,
            system_status: 10_000,
            network_status: 10_000,
            health_status: 10_000,
            error_log: 10_000,
            sales: 10_000,
        }
    }
}

/// Command dispatch configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DispatchConfig {
    /// Whether the HTTP caller waits for the per-device fan-out to finish
    pub completion: CompletionMode,
}

/// Telemetry normalizer configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NormalizerConfig {
    /// What to do with a message whose topic has no parseable device identity
    pub malformed_topic: MalformedTopicPolicy,
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `FLEETGATE__` prefix with double underscores for nesting:
    ///    - `FLEETGATE__BROKER__ADDRESS=mqtt.local:1883` overrides `broker.address`
    ///    - `FLEETGATE__STORE__CONF=tcp::addr=questdb:9009;` overrides `store.conf`
    ///    - `FLEETGATE__DISPATCH__COMPLETION=detached` overrides `dispatch.completion`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("http.bind", "0.0.0.0:8080")?
            .set_default("http.max_body_bytes", 1024 * 1024)?
            .set_default("broker.address", "localhost:1883")?
            .set_default("broker.protocol", "mqtt")?
            .set_default("broker.client_id", "fleetgate")?
            .set_default("broker.keep_alive", "60s")?
            .set_default("broker.clean_session", false)?
            .set_default("broker.reconnect_interval", "1s")?
            .set_default("broker.max_reconnect_interval", "60s")?
            .set_default("broker.connect_timeout", "10s")?
            .set_default("broker.ack_timeout", "30s")?
            .set_default("broker.startup_attempts", 3)?
            .set_default("broker.inflight", 100)?
            .set_default("broker.request_capacity", 1000)?
            .set_default("broker.inbound_capacity", 1024)?
            .set_default("broker.telemetry_qos", 1)?
            .set_default("broker.command_qos", 2)?
            .set_default("broker.topic_prefix", "v1")?
            .set_default("broker.layout", "device")?
            .set_default("store.conf", "tcp::addr=localhost:9009;")?
            .set_default("store.flush_interval", "1s")?
            .set_default("store.connect_timeout", "5s")?
            .set_default("store.max_buffer_bytes", 8 * 1024 * 1024)?
            .set_default("queues.download", 1_000_000)?
            .set_default("queues.system_status", 10_000)?
            .set_default("queues.network_status", 10_000)?
            .set_default("queues.health_status", 10_000)?
            .set_default("queues.error_log", 10_000)?
            .set_default("queues.sales", 10_000)?
            .set_default("dispatch.completion", "awaited")?
            .set_default("normalizer.malformed_topic", "sentinel")?
            .set_default("registration.path", "/api/devices/register")?
            .set_default("registration.timeout", "10s")?
            .set_default("registration.qos", 1)?
            .set_default("registration.capacity", 1024)?
            .set_default("metrics.enabled", true)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("FLEETGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, qos) in [
            ("telemetry_qos", self.broker.telemetry_qos),
            ("command_qos", self.broker.command_qos),
        ] {
            if qos > 2 {
                return Err(ConfigError::Validation(format!(
                    "broker.{} must be 0, 1, or 2",
                    name
                )));
            }
        }

        if self.broker.keep_alive < Duration::from_secs(5) {
            return Err(ConfigError::Validation(
                "broker.keep_alive must be at least 5s".to_string(),
            ));
        }

        if self.broker.max_reconnect_interval < self.broker.reconnect_interval {
            return Err(ConfigError::Validation(
                "broker.max_reconnect_interval must not be below broker.reconnect_interval"
                    .to_string(),
            ));
        }

        if self.broker.startup_attempts == 0 {
            return Err(ConfigError::Validation(
                "broker.startup_attempts must be at least 1".to_string(),
            ));
        }

        if self.broker.inflight == 0 || self.broker.request_capacity == 0 {
            return Err(ConfigError::Validation(
                "broker.inflight and broker.request_capacity must be at least 1".to_string(),
            ));
        }

        if self.broker.inbound_capacity == 0 {
            return Err(ConfigError::Validation(
                "broker.inbound_capacity must be at least 1".to_string(),
            ));
        }

        if self.broker.client_id.is_empty() {
            return Err(ConfigError::Validation(
                "broker.client_id cannot be empty".to_string(),
            ));
        }

        self.broker.host_port()?;

        if self.store.flush_interval.is_zero() {
            return Err(ConfigError::Validation(
                "store.flush_interval must be greater than zero".to_string(),
            ));
        }

        crate::store::conf_addr(&self.store.conf)
            .map_err(|e| ConfigError::Validation(format!("store.conf: {}", e)))?;

        if let Some(url) = &self.registration.backend_url {
            if !url.starts_with("http://") {
                return Err(ConfigError::Validation(
                    "registration.backend_url must be an http:// URL".to_string(),
                ));
            }
            if !self.registration.path.starts_with('/') {
                return Err(ConfigError::Validation(
                    "registration.path must start with '/'".to_string(),
                ));
            }
            if self.registration.qos > 2 {
                return Err(ConfigError::Validation(
                    "registration.qos must be 0, 1, or 2".to_string(),
                ));
            }
            if self.registration.capacity == 0 {
                return Err(ConfigError::Validation(
                    "registration.capacity must be greater than zero".to_string(),
                ));
            }
        }

        let queues = &self.queues;
        for (name, capacity) in [
            ("download", queues.download),
            ("system_status", queues.system_status),
            ("network_status", queues.network_status),
            ("health_status", queues.health_status),
            ("error_log", queues.error_log),
            ("sales", queues.sales),
        ] {
            if capacity == 0 {
                return Err(ConfigError::Validation(format!(
                    "queues.{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }
}
