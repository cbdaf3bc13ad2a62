//! Bounded per-category event queues
//!
//! Multi-producer, single-consumer. A full queue suspends the producer until
//! the writer drains a slot; nothing is dropped and FIFO order holds.

use std::fmt;

use tokio::sync::mpsc;

use crate::config::QueueConfig;
use crate::event::{
    Category, DownloadEvent, ErrorLogEvent, Event, HealthStatusEvent, NetworkStatusEvent,
    SalesEvent, SystemStatusEvent,
};


/// The consumer of a queue is gone; only happens during shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed(pub Category);

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} queue closed", self.0)
    }
}

impl std::error::Error for QueueClosed {}

/// Producer handle; cheap to clone
pub struct EventSender<T> {
    category: Category,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            category: self.category,
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSender<T> {
    /// Enqueue, waiting for capacity if the queue is full
    pub async fn send(&self, event: T) -> Result<(), QueueClosed> {
        self.tx
            .send(event)
            .await
            .map_err(|_| QueueClosed(self.category))
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Events currently waiting for the writer
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer end, owned by exactly one writer
pub struct EventReceiver<T> {
    category: Category,
    rx: mpsc::Receiver<T>,
}

impl<T> EventReceiver<T> {
    /// Next event, or `None` once every sender is dropped and the queue is drained
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Events waiting to be received
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn category(&self) -> Category {
        self.category
    }
}

/// Create a bounded queue for one category
pub fn bounded<T>(category: Category, capacity: usize) -> (EventSender<T>, EventReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSender { category, tx },
        EventReceiver { category, rx },
    )
}

/// Producer handles for every category
#[derive(Clone)]
pub struct EventQueues {
    pub download: EventSender<DownloadEvent>,
    pub system_status: EventSender<SystemStatusEvent>,
    pub network_status: EventSender<NetworkStatusEvent>,
    pub health_status: EventSender<HealthStatusEvent>,
    pub error_log: EventSender<ErrorLogEvent>,
    pub sales: EventSender<SalesEvent>,
}

/// Consumer ends for every category, handed to the writers
pub struct EventReceivers {
    pub download: EventReceiver<DownloadEvent>,
    pub system_status: EventReceiver<SystemStatusEvent>,
    pub network_status: EventReceiver<NetworkStatusEvent>,
    pub health_status: EventReceiver<HealthStatusEvent>,
    pub error_log: EventReceiver<ErrorLogEvent>,
    pub sales: EventReceiver<SalesEvent>,
}

impl EventQueues {
    pub fn new(config: &QueueConfig) -> (Self, EventReceivers) {
        let (download, download_rx) = bounded(Category::Download, config.download);
        let (system_status, system_status_rx) =
            bounded(Category::SystemStatus, config.system_status);
        let (network_status, network_status_rx) =
            bounded(Category::NetworkStatus, config.network_status);
        let (health_status, health_status_rx) =
            bounded(Category::HealthStatus, config.health_status);
        let (error_log, error_log_rx) = bounded(Category::ErrorLog, config.error_log);
        let (sales, sales_rx) = bounded(Category::Sales, config.sales);

        (
            Self {
                download,
                system_status,
                network_status,
                health_status,
                error_log,
                sales,
            },
            EventReceivers {
                download: download_rx,
                system_status: system_status_rx,
                network_status: network_status_rx,
                health_status: health_status_rx,
                error_log: error_log_rx,
                sales: sales_rx,
            },
        )
    }

    /// Route an event to its category's queue
    pub async fn send(&self, event: Event) -> Result<(), QueueClosed> {
        match event {
            Event::Download(e) => self.download.send(e).await,
            Event::SystemStatus(e) => self.system_status.send(e).await,
            Event::NetworkStatus(e) => self.network_status.send(e).await,
            Event::HealthStatus(e) => self.health_status.send(e).await,
            Event::ErrorLog(e) => self.error_log.send(e).await,
            Event::Sales(e) => self.sales.send(e).await,
        }
    }

    /// Queued events in a category
    pub fn len(&self, category: Category) -> usize {
        match category {
            Category::Download => self.download.len(),
            Category::SystemStatus => self.system_status.len(),
            Category::NetworkStatus => self.network_status.len(),
            Category::HealthStatus => self.health_status.len(),
            Category::ErrorLog => self.error_log.len(),
            Category::Sales => self.sales.len(),
        }
    }
}
