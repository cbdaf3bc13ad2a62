//! Broker error types

use std::fmt;
use std::time::Duration;

/// Initial connection to the broker could not be established
#[derive(Debug)]
pub enum ConnectError {
    /// Connection options are unusable
    Config(String),
    /// Every startup attempt failed
    Exhausted {
        address: String,
        attempts: u32,
        last_error: String,
    },
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Config(msg) => write!(f, "Invalid broker config: {}", msg),
            ConnectError::Exhausted {
                address,
                attempts,
                last_error,
            } => write!(
                f,
                "Could not connect to {} after {} attempts: {}",
                address, attempts, last_error
            ),
        }
    }
}

impl std::error::Error for ConnectError {}

/// A single publish did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The client refused the request (closed event loop, invalid topic)
    Request(String),
    /// No PUBACK / PUBCOMP within the configured bound
    AckTimeout(Duration),
    /// The connection task went away before acknowledging
    AckDropped,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Request(msg) => write!(f, "Publish rejected: {}", msg),
            TransportError::AckTimeout(after) => {
                write!(f, "No acknowledgment after {:?}", after)
            }
            TransportError::AckDropped => write!(f, "Connection closed before acknowledgment"),
        }
    }
}

impl std::error::Error for TransportError {}
