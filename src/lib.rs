//! fleetgate - MQTT device gateway
//!
//! Fans operator commands out to device fleets over MQTT, normalizes the
//! telemetry devices report back, and persists everything to a time-series
//! store in batches over the line protocol. Device registration requests are
//! relayed to the device backend.

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod event;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod normalizer;
pub mod queue;
pub mod registration;
pub mod store;
pub mod topic;
pub mod writer;

pub use broker::{BrokerConnection, ConnectionStatus, MessageHandler, Publisher};
pub use config::Config;
pub use dispatcher::{CompletionMode, DispatchReport, Dispatched, Dispatcher};
pub use event::{Category, Event};
pub use gateway::{Gateway, StartupError};
pub use metrics::Metrics;
pub use normalizer::{MalformedTopicPolicy, Normalizer};
pub use queue::EventQueues;
pub use topic::{DeviceIdentity, TopicLayout};
