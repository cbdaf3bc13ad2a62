//! Device registration forwarding
//!
//! Devices announce themselves on `<prefix>/<identity>/regist`. The route
//! stamps the device id from the topic and queues the request; the
//! forwarder POSTs it to the device backend and publishes the backend's
//! answer to `<prefix>/<identity>/regist/ack`.
//!
//! The two halves are split by a channel because the route has to be
//! subscribed before the broker session (and so the publisher) exists.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::{header, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::{MessageHandler, Publisher, QoS, Subscription, TransportError};
use crate::config::RegistrationConfig;
use crate::metrics::Metrics;
use crate::topic::{DeviceIdentity, IdentityError, TopicLayout};


pub const REGISTER_SUFFIX: &str = "regist";
pub const REPLY_SUFFIX: &str = "regist/ack";

/// Registration request as the backend expects it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Always taken from the topic, whatever the payload says
    #[serde(default)]
    pub device_id: i64,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub auth_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Backend answer, relayed to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A request tied to the device that sent it
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub device: DeviceIdentity,
    pub request: RegistrationRequest,
}

#[derive(Debug)]
pub enum RegistrationError {
    /// Payload or backend body is not the expected JSON
    Decode(serde_json::Error),
    /// Reply topic cannot be built for the device
    Topic(IdentityError),
    /// Backend endpoint is not a valid URI
    Endpoint(String),
    /// Backend unreachable or the exchange broke off
    Backend(String),
    /// Backend answered with a non-success status
    Status(StatusCode),
    /// No backend answer in time
    Timeout(Duration),
    /// Reply could not be published
    Publish(TransportError),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::Decode(e) => write!(f, "Invalid JSON: {}", e),
            RegistrationError::Topic(e) => write!(f, "No reply topic: {}", e),
            RegistrationError::Endpoint(e) => write!(f, "Invalid backend endpoint: {}", e),
            RegistrationError::Backend(e) => write!(f, "Backend request failed: {}", e),
            RegistrationError::Status(status) => write!(f, "Backend answered {}", status),
            RegistrationError::Timeout(after) => {
                write!(f, "No backend answer after {:?}", after)
            }
            RegistrationError::Publish(e) => write!(f, "Reply not published: {}", e),
        }
    }
}

impl std::error::Error for RegistrationError {}

impl From<serde_json::Error> for RegistrationError {
    fn from(e: serde_json::Error) -> Self {
        RegistrationError::Decode(e)
    }
}

impl From<TransportError> for RegistrationError {
    fn from(e: TransportError) -> Self {
        RegistrationError::Publish(e)
    }
}

/// Inbound side: decodes, identifies and queues registration requests
pub struct RegistrationRoute {
    layout: TopicLayout,
    tx: mpsc::Sender<Registration>,
    metrics: Arc<Metrics>,
}

impl RegistrationRoute {
    /// Route plus the receive end the forwarder drains
    pub fn new(
        layout: TopicLayout,
        capacity: usize,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, mpsc::Receiver<Registration>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                layout,
                tx,
                metrics,
            }),
            rx,
        )
    }

    pub fn subscription(self: &Arc<Self>, qos: QoS) -> Subscription {
        Subscription::new(self.layout.filter(REGISTER_SUFFIX), qos, self.clone())
    }

    /// Decode `payload` and stamp the device id from `topic`
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Registration, RegistrationError> {
        let mut request: RegistrationRequest = serde_json::from_slice(payload)?;
        let device = self
            .layout
            .parse_identity(topic)
            .map_err(RegistrationError::Topic)?;
        request.device_id = device.device_id;
        Ok(Registration { device, request })
    }
}

#[async_trait]
impl MessageHandler for RegistrationRoute {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        let registration = match self.decode(topic, payload) {
            Ok(registration) => registration,
            Err(e) => {
                warn!(topic, error = %e, "Discarding registration request");
                self.metrics.registration("discarded");
                return;
            }
        };

        debug!(topic, device_id = registration.device.device_id, "Registration queued");
        if self.tx.send(registration).await.is_err() {
            warn!(topic, "Registration forwarder gone, dropping request");
            self.metrics.registration("discarded");
        }
    }
}

/// Outbound side: backend round trip and reply publish
pub struct RegistrationForwarder {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: Uri,
    layout: TopicLayout,
    publisher: Arc<dyn Publisher>,
    qos: QoS,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl RegistrationForwarder {
    pub fn new(
        endpoint: &str,
        timeout: Duration,
        layout: TopicLayout,
        publisher: Arc<dyn Publisher>,
        qos: QoS,
        metrics: Arc<Metrics>,
    ) -> Result<Self, RegistrationError> {
        let endpoint = endpoint
            .parse::<Uri>()
            .map_err(|e| RegistrationError::Endpoint(e.to_string()))?;
        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self {
            client,
            endpoint,
            layout,
            publisher,
            qos,
            timeout,
            metrics,
        })
    }

    /// Forwarder for an enabled registration config
    pub fn from_config(
        config: &RegistrationConfig,
        layout: TopicLayout,
        publisher: Arc<dyn Publisher>,
        qos: QoS,
        metrics: Arc<Metrics>,
    ) -> Result<Option<Self>, RegistrationError> {
        config
            .endpoint()
            .map(|endpoint| Self::new(&endpoint, config.timeout, layout, publisher, qos, metrics))
            .transpose()
    }

    /// Drain `rx`, forwarding each request on its own task
    pub fn spawn(self: Arc<Self>, mut rx: mpsc::Receiver<Registration>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(endpoint = %self.endpoint, "Registration forwarder started");
            while let Some(registration) = rx.recv().await {
                let forwarder = self.clone();
                tokio::spawn(async move {
                    let device_id = registration.device.device_id;
                    match forwarder.forward(registration).await {
                        Ok(reply) => {
                            info!(device_id, status = %reply.status, "Device registration answered");
                            forwarder.metrics.registration("forwarded");
                        }
                        Err(e) => {
                            warn!(device_id, error = %e, "Device registration failed");
                            forwarder.metrics.registration("failed");
                        }
                    }
                });
            }
            debug!("Registration forwarder stopped");
        })
    }

    /// POST one request to the backend and publish its answer to the device
    pub async fn forward(
        &self,
        registration: Registration,
    ) -> Result<RegistrationReply, RegistrationError> {
        let reply_topic = self
            .layout
            .device_topic(&registration.device, REPLY_SUFFIX)
            .map_err(RegistrationError::Topic)?;

        let body = serde_json::to_vec(&registration.request)?;
        let reply = tokio::time::timeout(self.timeout, self.post(body))
            .await
            .map_err(|_| RegistrationError::Timeout(self.timeout))??;

        let payload = serde_json::to_vec(&reply)?;
        self.publisher
            .publish(&reply_topic, Bytes::from(payload), self.qos)
            .await?
            .wait()
            .await?;
        Ok(reply)
    }

    async fn post(&self, body: Vec<u8>) -> Result<RegistrationReply, RegistrationError> {
        let request = Request::post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| RegistrationError::Endpoint(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| RegistrationError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistrationError::Status(status));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RegistrationError::Backend(e.to_string()))?
            .to_bytes();
        Ok(serde_json::from_slice(&body)?)
    }
}
