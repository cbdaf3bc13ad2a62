//! Command dispatcher
//!
//! Fans one operator request out to every target device. Each device gets
//! its own publish, its own provisional outcome event and its own ack wait;
//! a failure on one device never affects another.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::broker::{Publisher, QoS};
use crate::event::command::Command;
use crate::event::{
    AdsDeployRequest, CancelRequest, Category, DownloadEvent, FirmwareDeployRequest,
};
use crate::metrics::Metrics;
use crate::queue::EventSender;
use crate::topic::{DeviceIdentity, TopicLayout};

#[cfg(test)]
mod tests;

/// Whether callers wait for the fan-out to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// Return once every device publish has been acknowledged or failed
    #[default]
    Awaited,
    /// Return immediately; the fan-out runs in the background
    Detached,
}

/// Per-request delivery tally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub targets: usize,
    pub published: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Completed(DispatchReport),
    Detached,
}

#[derive(Debug)]
pub enum DispatchError {
    /// Command payload could not be serialized
    Encode(serde_json::Error),
    /// Firmware request without content
    MissingContent,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Encode(e) => write!(f, "Failed to encode command: {}", e),
            DispatchError::MissingContent => write!(f, "Firmware request has no content"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Encode(e) => Some(e),
            DispatchError::MissingContent => None,
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Encode(e)
    }
}

struct Shared {
    publisher: Arc<dyn Publisher>,
    downloads: EventSender<DownloadEvent>,
    layout: TopicLayout,
    qos: QoS,
    metrics: Arc<Metrics>,
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    mode: CompletionMode,
}

impl Dispatcher {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        downloads: EventSender<DownloadEvent>,
        layout: TopicLayout,
        qos: QoS,
        mode: CompletionMode,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                publisher,
                downloads,
                layout,
                qos,
                metrics,
            }),
            mode,
        }
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    pub async fn deploy_firmware(
        &self,
        req: &FirmwareDeployRequest,
    ) -> Result<Dispatched, DispatchError> {
        let content = req.content.as_ref().ok_or(DispatchError::MissingContent)?;
        let command = Command::firmware(req, content)?;
        Ok(self.dispatch(command, req.devices.clone()).await)
    }

    pub async fn deploy_advertisements(
        &self,
        req: &AdsDeployRequest,
    ) -> Result<Dispatched, DispatchError> {
        let command = Command::advertisements(req)?;
        Ok(self.dispatch(command, req.devices.clone()).await)
    }

    pub async fn cancel(&self, req: &CancelRequest) -> Result<Dispatched, DispatchError> {
        let command = Command::cancel(req)?;
        Ok(self.dispatch(command, req.devices.clone()).await)
    }

    /// Publish `command` to every device in `devices`, in list order,
    /// duplicates included
    pub async fn dispatch(&self, command: Command, devices: Vec<DeviceIdentity>) -> Dispatched {
        let command = Arc::new(command);
        let targets = devices.len();
        info!(
            command_id = %command.id,
            kind = command.kind.as_str(),
            targets,
            "Dispatching command"
        );

        let mut units = JoinSet::new();
        for device in devices {
            units.spawn(deliver(self.shared.clone(), command.clone(), device));
        }

        match self.mode {
            CompletionMode::Awaited => Dispatched::Completed(collect(&command, targets, units).await),
            CompletionMode::Detached => {
                tokio::spawn(async move {
                    collect(&command, targets, units).await;
                });
                Dispatched::Detached
            }
        }
    }
}

async fn collect(command: &Command, targets: usize, mut units: JoinSet<bool>) -> DispatchReport {
    let mut report = DispatchReport {
        targets,
        ..DispatchReport::default()
    };

    while let Some(joined) = units.join_next().await {
        match joined {
            Ok(true) => report.published += 1,
            Ok(false) => report.failed += 1,
            Err(e) => {
                error!(command_id = %command.id, error = %e, "Delivery task aborted");
                report.failed += 1;
            }
        }
    }

    info!(
        command_id = %command.id,
        targets = report.targets,
        published = report.published,
        failed = report.failed,
        "Dispatch finished"
    );
    report
}

/// One device: publish, record intent, wait for the broker
async fn deliver(shared: Arc<Shared>, command: Arc<Command>, device: DeviceIdentity) -> bool {
    let kind = command.kind.as_str();
    let device_id = device.device_id;

    let topic = match shared.layout.device_topic(&device, command.kind.topic_suffix()) {
        Ok(topic) => topic,
        Err(e) => {
            warn!(command_id = %command.id, device_id, error = %e, "No topic for device");
            shared.metrics.command_failed(kind);
            return false;
        }
    };

    let started = Instant::now();
    let publish = shared
        .publisher
        .publish(&topic, command.payload.clone(), shared.qos)
        .await;

    // The provisional record stands whatever the broker says
    match shared.downloads.send(command.provisional_event(device)).await {
        Ok(()) => shared
            .metrics
            .event_enqueued(Category::Download, shared.downloads.len()),
        Err(e) => warn!(command_id = %command.id, device_id, error = %e, "Provisional event dropped"),
    }

    let acked = match publish {
        Ok(ack) => ack.wait().await,
        Err(e) => Err(e),
    };

    match acked {
        Ok(()) => {
            let elapsed = started.elapsed();
            debug!(command_id = %command.id, device_id, %topic, ?elapsed, "Command acknowledged");
            shared.metrics.command_published(kind, elapsed.as_secs_f64());
            true
        }
        Err(e) => {
            warn!(command_id = %command.id, device_id, %topic, error = %e, "Command delivery failed");
            shared.metrics.command_failed(kind);
            false
        }
    }
}
