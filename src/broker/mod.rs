//! Broker connection
//!
//! The gateway keeps exactly one MQTT session. Inbound publishes are routed
//! to the handler registered for the matching filter; outbound commands go
//! through the [`Publisher`] seam so the dispatcher can run without a broker.

mod ack;
mod connection;
mod error;
mod router;

pub use ack::{AckTracker, PublishAck};
pub use connection::{Backoff, BrokerConnection};
pub use error::{ConnectError, TransportError};
pub use router::InboundRouter;
pub use rumqttc::QoS;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

#[cfg(test)]
mod tests;

/// Connection state as seen by the rest of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a reconnect delay
    Backoff,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Backoff => "backoff",
        };
        f.write_str(s)
    }
}

/// Outbound side of the broker session
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Queue a publish. The returned handle resolves once the broker has
    /// acknowledged it (immediately for QoS 0 once written).
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<PublishAck, TransportError>;
}

/// Receives inbound publishes for one subscription
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, topic: &str, payload: &[u8]);
}

/// A topic filter and the handler its messages go to
#[derive(Clone)]
pub struct Subscription {
    pub filter: String,
    pub qos: QoS,
    pub handler: Arc<dyn MessageHandler>,
}

impl Subscription {
    pub fn new(filter: impl Into<String>, qos: QoS, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            filter: filter.into(),
            qos,
            handler,
        }
    }
}

/// Map a configured QoS level to the client's type
pub fn qos_from_u8(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}
