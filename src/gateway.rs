//! Process wiring
//!
//! Builds every component in dependency order and tears them down in
//! reverse, so queued events reach the store before the process exits.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{
    qos_from_u8, BrokerConnection, ConnectError, ConnectionStatus, Publisher, QoS,
};
use crate::config::{Config, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::http::ApiServer;
use crate::metrics::Metrics;
use crate::normalizer::Normalizer;
use crate::queue::{EventQueues, EventReceiver};
use crate::registration::{RegistrationError, RegistrationForwarder, RegistrationRoute};
use crate::store::{PersistenceError, TcpLineSender, ToRows};
use crate::topic::{validate_topic_filter, TopicLayout};
use crate::writer::PersistenceWriter;

/// Anything that stops the gateway from starting
#[derive(Debug)]
pub enum StartupError {
    Config(ConfigError),
    Store(PersistenceError),
    Broker(ConnectError),
    Registration(RegistrationError),
    Http(std::io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Config(e) => write!(f, "Configuration error: {}", e),
            StartupError::Store(e) => write!(f, "Store unavailable: {}", e),
            StartupError::Broker(e) => write!(f, "Broker unavailable: {}", e),
            StartupError::Registration(e) => write!(f, "Registration forwarding: {}", e),
            StartupError::Http(e) => write!(f, "Failed to bind operator API: {}", e),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::Config(e) => Some(e),
            StartupError::Store(e) => Some(e),
            StartupError::Broker(e) => Some(e),
            StartupError::Registration(e) => Some(e),
            StartupError::Http(e) => Some(e),
        }
    }
}

impl From<ConfigError> for StartupError {
    fn from(e: ConfigError) -> Self {
        StartupError::Config(e)
    }
}

impl From<PersistenceError> for StartupError {
    fn from(e: PersistenceError) -> Self {
        StartupError::Store(e)
    }
}

impl From<ConnectError> for StartupError {
    fn from(e: ConnectError) -> Self {
        StartupError::Broker(e)
    }
}

impl From<RegistrationError> for StartupError {
    fn from(e: RegistrationError) -> Self {
        StartupError::Registration(e)
    }
}

impl From<std::io::Error> for StartupError {
    fn from(e: std::io::Error) -> Self {
        StartupError::Http(e)
    }
}

/// A running gateway
pub struct Gateway {
    metrics: Arc<Metrics>,
    broker: Arc<BrokerConnection>,
    api_addr: SocketAddr,
    api_task: JoinHandle<()>,
    api_shutdown: CancellationToken,
    writers: Vec<JoinHandle<()>>,
    registration: Option<JoinHandle<()>>,
}

impl Gateway {
    pub async fn start(config: Config) -> Result<Self, StartupError> {
        let metrics = Arc::new(Metrics::new());
        let (queues, receivers) = EventQueues::new(&config.queues);

        // Writers first so nothing enqueued is ever without a consumer
        let writers = vec![
            spawn_writer(receivers.download, &config, &metrics).await?,
            spawn_writer(receivers.system_status, &config, &metrics).await?,
            spawn_writer(receivers.network_status, &config, &metrics).await?,
            spawn_writer(receivers.health_status, &config, &metrics).await?,
            spawn_writer(receivers.error_log, &config, &metrics).await?,
            spawn_writer(receivers.sales, &config, &metrics).await?,
        ];
        info!(store = %config.store.conf, "Persistence writers started");

        let layout = TopicLayout::new(config.broker.topic_prefix.clone(), config.broker.layout);
        let telemetry_qos = qos(config.broker.telemetry_qos, "broker.telemetry_qos")?;
        let command_qos = qos(config.broker.command_qos, "broker.command_qos")?;

        let normalizer = Arc::new(Normalizer::new(
            layout.clone(),
            queues.clone(),
            config.normalizer.malformed_topic,
            metrics.clone(),
        ));
        let mut subscriptions = normalizer.subscriptions(telemetry_qos);

        let registration_qos = qos(config.registration.qos, "registration.qos")?;
        let registration_inbox = if config.registration.enabled() {
            let (route, rx) = RegistrationRoute::new(
                layout.clone(),
                config.registration.capacity,
                metrics.clone(),
            );
            subscriptions.push(route.subscription(registration_qos));
            Some(rx)
        } else {
            None
        };
        for sub in &subscriptions {
            validate_topic_filter(&sub.filter).map_err(|e| {
                ConfigError::Validation(format!("subscription filter {}: {}", sub.filter, e))
            })?;
        }
        drop(normalizer);

        let broker = Arc::new(
            BrokerConnection::connect(&config.broker, subscriptions, metrics.clone()).await?,
        );

        let publisher: Arc<dyn Publisher> = broker.clone();
        let registration = match (
            registration_inbox,
            RegistrationForwarder::from_config(
                &config.registration,
                layout.clone(),
                publisher.clone(),
                registration_qos,
                metrics.clone(),
            )?,
        ) {
            (Some(rx), Some(forwarder)) => Some(Arc::new(forwarder).spawn(rx)),
            _ => None,
        };

        let dispatcher = Arc::new(Dispatcher::new(
            publisher,
            queues.download.clone(),
            layout,
            command_qos,
            config.dispatch.completion,
            metrics.clone(),
        ));
        // Only the normalizer routes and the dispatcher keep producers alive
        drop(queues);

        let api = ApiServer::bind(
            &config.http,
            dispatcher,
            metrics.clone(),
            config.metrics.enabled,
        )
        .await?;
        let api_addr = api.local_addr()?;
        let api_shutdown = CancellationToken::new();
        let api_task = tokio::spawn(api.run(api_shutdown.clone()));

        info!(api = %api_addr, broker = %config.broker.address, "Gateway started");

        Ok(Self {
            metrics,
            broker,
            api_addr,
            api_task,
            api_shutdown,
            writers,
            registration,
        })
    }

    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    pub fn broker_status(&self) -> ConnectionStatus {
        self.broker.status()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop intake, disconnect, then let every writer drain and flush
    pub async fn shutdown(self) {
        info!("Shutting down gateway");

        self.api_shutdown.cancel();
        if let Err(e) = self.api_task.await {
            warn!(error = %e, "Operator API task failed");
        }

        self.broker.shutdown().await;
        drop(self.broker);

        // The route went away with the broker's router, so the forwarder drains
        if let Some(registration) = self.registration {
            if let Err(e) = registration.await {
                warn!(error = %e, "Registration forwarder failed");
            }
        }

        for writer in self.writers {
            if let Err(e) = writer.await {
                warn!(error = %e, "Writer task failed");
            }
        }
        info!("Gateway stopped");
    }
}

async fn spawn_writer<T>(
    rx: EventReceiver<T>,
    config: &Config,
    metrics: &Arc<Metrics>,
) -> Result<JoinHandle<()>, StartupError>
where
    T: ToRows + Send + 'static,
{
    let sender = TcpLineSender::connect(&config.store).await?;
    Ok(PersistenceWriter::new(rx, sender, config.store.flush_interval, metrics.clone()).spawn())
}

fn qos(level: u8, name: &str) -> Result<QoS, ConfigError> {
    qos_from_u8(level)
        .ok_or_else(|| ConfigError::Validation(format!("{} must be 0, 1, or 2", name)))
}
