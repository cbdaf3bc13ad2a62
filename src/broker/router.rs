//! Inbound message routing

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::Subscription;
use crate::topic::topic_matches_filter;

/// One message taken off the wire
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

/// Delivers inbound publishes to every subscription whose filter matches
pub struct InboundRouter {
    subscriptions: Arc<[Subscription]>,
}

impl InboundRouter {
    pub fn new(subscriptions: Arc<[Subscription]>) -> Self {
        Self { subscriptions }
    }

    /// Deliver one message. Returns how many handlers received it.
    pub async fn route(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for sub in self
            .subscriptions
            .iter()
            .filter(|s| topic_matches_filter(topic, &s.filter))
        {
            trace!(topic, filter = %sub.filter, "Routing inbound message");
            sub.handler.on_message(topic, payload).await;
            delivered += 1;
        }

        if delivered == 0 {
            debug!(topic, "No handler for inbound message");
        }
        delivered
    }

    /// Drain `rx` until the connection side closes it
    pub(crate) fn spawn(self, mut rx: mpsc::Receiver<InboundMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                self.route(&msg.topic, &msg.payload).await;
            }
            debug!("Inbound router stopped");
        })
    }
}
