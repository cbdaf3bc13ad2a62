//! MQTT session management
//!
//! Owns the client event loop: initial connect with bounded attempts,
//! reconnect with capped exponential backoff, resubscribe after every
//! CONNACK, and packet id bookkeeping for publish acknowledgments.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnAck, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ack::{AckTracker, PublishAck};
use super::error::{ConnectError, TransportError};
use super::router::{InboundMessage, InboundRouter};
use super::{ConnectionStatus, Publisher, Subscription};
use crate::config::BrokerConfig;
use crate::metrics::Metrics;

/// Upper bound on waiting for the event loop to send DISCONNECT
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Capped exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the following one up to the cap
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// The gateway's single broker session
pub struct BrokerConnection {
    client: AsyncClient,
    acks: Arc<AckTracker>,
    /// Keeps request order and waiter order identical
    publish_order: tokio::sync::Mutex<()>,
    ack_timeout: Duration,
    status: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
    event_loop_task: Mutex<Option<JoinHandle<()>>>,
    router_task: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerConnection {
    /// Connect, subscribe every filter and start the background loops.
    ///
    /// Fails if no CONNACK arrives within `startup_attempts` tries.
    pub async fn connect(
        config: &BrokerConfig,
        subscriptions: Vec<Subscription>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ConnectError> {
        let options = mqtt_options(config)?;
        let (client, mut event_loop) = AsyncClient::new(options, config.request_capacity);
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);

        let ack = wait_for_first_connack(config, &mut event_loop).await?;
        info!(
            address = %config.address,
            client_id = %config.client_id,
            session_present = ack.session_present,
            "Connected to broker"
        );
        status_tx.send_replace(ConnectionStatus::Connected);
        metrics.broker_up();

        let filters: Arc<[(String, QoS)]> = subscriptions
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect();
        spawn_subscribe(client.clone(), filters.clone());

        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let router_task = InboundRouter::new(subscriptions.into()).spawn(inbound_rx);

        let acks = Arc::new(AckTracker::new());
        let cancel = CancellationToken::new();
        let session = Session {
            client: client.clone(),
            acks: acks.clone(),
            filters,
            inbound_tx,
            status_tx,
            metrics,
            backoff: Backoff::new(config.reconnect_interval, config.max_reconnect_interval),
            lost: false,
            cancel: cancel.clone(),
        };
        let event_loop_task = tokio::spawn(session.run(event_loop));

        Ok(Self {
            client,
            acks,
            publish_order: tokio::sync::Mutex::new(()),
            ack_timeout: config.ack_timeout,
            status,
            cancel,
            event_loop_task: Mutex::new(Some(event_loop_task)),
            router_task: Mutex::new(Some(router_task)),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Send DISCONNECT, stop the event loop and let the router drain
    pub async fn shutdown(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "Disconnect request not queued");
        }

        let event_loop = self.event_loop_task.lock().take();
        if let Some(mut handle) = event_loop {
            if timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                self.cancel.cancel();
                let _ = handle.await;
            }
        }
        self.cancel.cancel();

        let router = self.router_task.lock().take();
        if let Some(handle) = router {
            let _ = handle.await;
        }
        info!("Broker connection closed");
    }
}

#[async_trait]
impl Publisher for BrokerConnection {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<PublishAck, TransportError> {
        let _order = self.publish_order.lock().await;
        let rx = self.acks.enqueue();
        if let Err(e) = self.client.publish_bytes(topic, qos, false, payload).await {
            self.acks.cancel_last();
            return Err(TransportError::Request(e.to_string()));
        }
        Ok(PublishAck::pending(rx, self.ack_timeout))
    }
}

fn mqtt_options(config: &BrokerConfig) -> Result<MqttOptions, ConnectError> {
    let (host, port) = config
        .host_port()
        .map_err(|e| ConnectError::Config(e.to_string()))?;

    let mut options = MqttOptions::new(config.client_id.clone(), host, port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(config.clean_session);
    options.set_inflight(config.inflight);

    if let Some(username) = &config.username {
        options.set_credentials(
            username.clone(),
            config.password.clone().unwrap_or_default(),
        );
    }
    if config.protocol.uses_tls() {
        options.set_transport(Transport::tls_with_default_config());
    }

    Ok(options)
}

async fn wait_for_first_connack(
    config: &BrokerConfig,
    event_loop: &mut EventLoop,
) -> Result<ConnAck, ConnectError> {
    let mut last_error = String::new();

    for attempt in 1..=config.startup_attempts {
        match timeout(config.connect_timeout, poll_until_connack(event_loop)).await {
            Ok(Ok(ack)) => return Ok(ack),
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => {
                last_error = format!("no CONNACK within {:?}", config.connect_timeout)
            }
        }

        warn!(
            address = %config.address,
            attempt,
            attempts = config.startup_attempts,
            error = %last_error,
            "Broker connect attempt failed"
        );
        if attempt < config.startup_attempts {
            sleep(config.reconnect_interval).await;
        }
    }

    Err(ConnectError::Exhausted {
        address: config.address.clone(),
        attempts: config.startup_attempts,
        last_error,
    })
}

async fn poll_until_connack(event_loop: &mut EventLoop) -> Result<ConnAck, ConnectionError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(ack)) = event_loop.poll().await? {
            return Ok(ack);
        }
    }
}

fn spawn_subscribe(client: AsyncClient, filters: Arc<[(String, QoS)]>) {
    tokio::spawn(async move {
        for (filter, qos) in filters.iter() {
            match client.subscribe(filter.as_str(), *qos).await {
                Ok(()) => debug!(filter = %filter, ?qos, "Subscribe requested"),
                Err(e) => {
                    error!(filter = %filter, error = %e, "Failed to request subscription");
                    return;
                }
            }
        }
    });
}

/// State owned by the event loop task
struct Session {
    client: AsyncClient,
    acks: Arc<AckTracker>,
    filters: Arc<[(String, QoS)]>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    status_tx: watch::Sender<ConnectionStatus>,
    metrics: Arc<Metrics>,
    backoff: Backoff,
    /// Connection dropped since the last CONNACK
    lost: bool,
    cancel: CancellationToken,
}

impl Session {
    async fn run(mut self, mut event_loop: EventLoop) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(session_present = ack.session_present, "Reconnected to broker");
                    self.backoff.reset();
                    self.status_tx.send_replace(ConnectionStatus::Connected);
                    self.metrics.broker_up();
                    if std::mem::take(&mut self.lost) {
                        self.metrics.broker_reconnected();
                    }
                    spawn_subscribe(self.client.clone(), self.filters.clone());
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let msg = InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        sent = self.inbound_tx.send(msg) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => self.acks.on_ack(ack.pkid),
                Ok(Event::Incoming(Packet::PubRec(rec))) => self.acks.on_pubrec(rec.pkid),
                Ok(Event::Incoming(Packet::PubComp(comp))) => self.acks.on_ack(comp.pkid),
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(pkid = ack.pkid, codes = ?ack.return_codes, "Subscription acknowledged");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("Broker sent DISCONNECT");
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.acks.on_outgoing_publish(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("DISCONNECT sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.acks.on_connection_lost();
                    self.lost = true;
                    let delay = self.backoff.next();
                    self.status_tx.send_replace(ConnectionStatus::Backoff);
                    self.metrics.broker_down();
                    warn!(error = %e, ?delay, "Broker connection lost, retrying");

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = sleep(delay) => {}
                    }
                    self.status_tx.send_replace(ConnectionStatus::Connecting);
                }
            }
        }

        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        self.metrics.broker_connected.set(0);
        debug!(
            queued = self.acks.queued(),
            inflight = self.acks.inflight(),
            "Broker event loop stopped"
        );
    }
}
