//! Telemetry normalizer
//!
//! Turns device publishes into canonical events and hands them to the
//! category queues. Bad payloads are logged and dropped; the device will
//! report again on its own schedule.

mod routes;

pub use routes::{normalize, Report, RouteKind};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::broker::{MessageHandler, QoS, Subscription};
use crate::event::Category;
use crate::metrics::Metrics;
use crate::queue::EventQueues;
use crate::topic::{DeviceIdentity, TopicLayout};


/// What to do with a message whose topic carries no usable identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedTopicPolicy {
    /// Keep the event under the zero identity
    #[default]
    Sentinel,
    /// Drop the message
    Reject,
}

/// Result of handling one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Enqueued,
    /// Payload did not decode
    Undecodable,
    /// Topic identity unusable under the reject policy
    Rejected,
    /// Queue consumer gone
    Closed,
}

pub struct Normalizer {
    layout: TopicLayout,
    queues: EventQueues,
    policy: MalformedTopicPolicy,
    metrics: Arc<Metrics>,
}

impl Normalizer {
    pub fn new(
        layout: TopicLayout,
        queues: EventQueues,
        policy: MalformedTopicPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            layout,
            queues,
            policy,
            metrics,
        }
    }

    /// One subscription per route, all at `qos`
    pub fn subscriptions(self: &Arc<Self>, qos: QoS) -> Vec<Subscription> {
        RouteKind::ALL
            .iter()
            .map(|&kind| {
                let handler = Arc::new(RouteHandler {
                    kind,
                    normalizer: self.clone(),
                });
                Subscription::new(self.layout.filter(kind.suffix()), qos, handler)
            })
            .collect()
    }

    /// Decode, identify, map and enqueue one message.
    ///
    /// Suspends while the category queue is full.
    pub async fn handle(&self, kind: RouteKind, topic: &str, payload: &[u8]) -> Outcome {
        let category = kind.category();

        let report = match Report::decode(kind, payload) {
            Ok(report) => report,
            Err(e) => {
                warn!(%category, topic, error = %e, "Discarding undecodable message");
                self.metrics.event_discarded(category, "decode");
                return Outcome::Undecodable;
            }
        };

        let Some(device) = self.identify(category, topic) else {
            self.metrics.event_discarded(category, "topic");
            return Outcome::Rejected;
        };

        let event = report.into_event(device);
        let device_id = event.device().device_id;
        if let Err(e) = self.queues.send(event).await {
            warn!(%category, topic, error = %e, "Dropping event during shutdown");
            self.metrics.event_discarded(category, "closed");
            return Outcome::Closed;
        }

        debug!(%category, topic, device_id, "Event enqueued");
        self.metrics
            .event_enqueued(category, self.queues.len(category));
        Outcome::Enqueued
    }

    fn identify(&self, category: Category, topic: &str) -> Option<DeviceIdentity> {
        match self.layout.parse_identity(topic) {
            Ok(device) => Some(device),
            Err(e) => {
                self.metrics.malformed_topic(category);
                match self.policy {
                    MalformedTopicPolicy::Sentinel => {
                        warn!(%category, topic, error = %e, "Malformed topic, using sentinel identity");
                        Some(self.layout.sentinel())
                    }
                    MalformedTopicPolicy::Reject => {
                        warn!(%category, topic, error = %e, "Malformed topic, discarding message");
                        None
                    }
                }
            }
        }
    }
}

/// Binds a route to the shared normalizer
struct RouteHandler {
    kind: RouteKind,
    normalizer: Arc<Normalizer>,
}

#[async_trait]
impl MessageHandler for RouteHandler {
    async fn on_message(&self, topic: &str, payload: &[u8]) {
        self.normalizer.handle(self.kind, topic, payload).await;
    }
}
