//! Broker Configuration
//!
//! Connection parameters for the gateway's single MQTT session.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;
use crate::topic::IdentityLayout;

/// Broker connection protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    /// Plain MQTT over TCP
    #[default]
    Mqtt,
    /// MQTT over TLS
    Mqtts,
}

impl std::fmt::Display for BrokerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerProtocol::Mqtt => write!(f, "mqtt"),
            BrokerProtocol::Mqtts => write!(f, "mqtts"),
        }
    }
}

impl BrokerProtocol {
    /// Get default port for this protocol
    pub fn default_port(&self) -> u16 {
        match self {
            BrokerProtocol::Mqtt => 1883,
            BrokerProtocol::Mqtts => 8883,
        }
    }

    /// Check if this protocol uses TLS
    pub fn uses_tls(&self) -> bool {
        matches!(self, BrokerProtocol::Mqtts)
    }
}

/// Configuration for the broker connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker address (host:port, port optional)
    pub address: String,

    /// Connection protocol
    pub protocol: BrokerProtocol,

    /// Client identifier presented to the broker
    pub client_id: String,

    /// Username for authentication
    pub username: Option<String>,

    /// Password for authentication
    pub password: Option<String>,

    /// Keep alive interval
    #[serde(with = "humantime_serde")]
    pub keep_alive: Duration,

    /// Clean session flag. Defaults to false so the broker keeps the
    /// session (and QoS 1/2 state) across reconnects.
    pub clean_session: bool,

    /// Initial reconnect delay
    #[serde(with = "humantime_serde")]
    pub reconnect_interval: Duration,

    /// Reconnect delay cap for exponential backoff
    #[serde(with = "humantime_serde")]
    pub max_reconnect_interval: Duration,

    /// TCP + CONNACK timeout per attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Upper bound on waiting for PUBACK / PUBCOMP
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,

    /// Connect attempts at startup before giving up
    pub startup_attempts: u32,

    /// Maximum outgoing QoS 1/2 publishes awaiting acknowledgment
    pub inflight: u16,

    /// Capacity of the client request channel
    pub request_capacity: usize,

    /// Capacity of the inbound message channel towards handlers
    pub inbound_capacity: usize,

    /// QoS for telemetry subscriptions
    pub telemetry_qos: u8,

    /// QoS for command publishes
    pub command_qos: u8,

    /// Fixed first topic level
    pub topic_prefix: String,

    /// Where device identity lives in topic paths
    pub layout: IdentityLayout,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:1883".to_string(),
            protocol: BrokerProtocol::Mqtt,
            client_id: "fleetgate".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            clean_session: false,
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(30),
            startup_attempts: 3,
            inflight: 100,
            request_capacity: 1000,
            inbound_capacity: 1024,
            telemetry_qos: 1,
            command_qos: 2,
            topic_prefix: "v1".to_string(),
            layout: IdentityLayout::Device,
        }
    }
}

impl BrokerConfig {
    /// Split the address into host and port, falling back to the protocol's
    /// default port.
    pub fn host_port(&self) -> Result<(String, u16), ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::Validation(
                "broker.address cannot be empty".to_string(),
            ));
        }

        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::Validation(format!("broker.address has invalid port: {}", port))
                })?;
                Ok((host.to_string(), port))
            }
            Some(_) => Err(ConfigError::Validation(format!(
                "broker.address has no host: {}",
                address
            ))),
            None => Ok((address.to_string(), self.protocol.default_port())),
        }
    }
}
