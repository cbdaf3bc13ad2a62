//! Publish acknowledgment tracking
//!
//! The client hands packet ids out inside the event loop, so a waiter can
//! only be tied to its id when the loop reports the outgoing PUBLISH.
//! Waiters are queued in request order and bound to ids in the same order.
//!
//! One id can carry more than one waiter at a time. The client reuses an id
//! for a held-back publish as soon as the previous holder is acked, and
//! reports that PUBLISH before the ack that freed the id. Under QoS 2 an id
//! is free again after PUBREC, while its PUBCOMP is still outstanding. Each
//! id therefore keeps its waiters in send order and every ack resolves the
//! oldest one.
//!
//! A PUBLISH for an id only counts as a retransmission when the connection
//! was lost while that id had an unreleased waiter.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use super::error::TransportError;

struct Waiter {
    tx: oneshot::Sender<()>,
    /// PUBREC seen; only PUBCOMP is outstanding and the client will not
    /// resend the PUBLISH
    released: bool,
}

#[derive(Default)]
pub struct AckTracker {
    queued: Mutex<VecDeque<oneshot::Sender<()>>>,
    inflight: DashMap<u16, VecDeque<Waiter>>,
    resend: Mutex<HashSet<u16>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next publish request
    pub fn enqueue(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.queued.lock().push_back(tx);
        rx
    }

    /// Withdraw the most recent waiter after its request was refused
    pub fn cancel_last(&self) {
        self.queued.lock().pop_back();
    }

    /// Event loop sent a PUBLISH with `pkid` (0 for QoS 0)
    pub fn on_outgoing_publish(&self, pkid: u16) {
        if pkid != 0 && self.resend.lock().remove(&pkid) {
            debug!(pkid, "Publish retransmitted");
            return;
        }

        let Some(tx) = self.queued.lock().pop_front() else {
            debug!(pkid, "Outgoing publish without a waiter");
            return;
        };

        if pkid == 0 {
            let _ = tx.send(());
        } else {
            self.inflight.entry(pkid).or_default().push_back(Waiter {
                tx,
                released: false,
            });
        }
    }

    /// PUBREC arrived for `pkid` (QoS 2, first half)
    pub fn on_pubrec(&self, pkid: u16) {
        if let Some(mut waiters) = self.inflight.get_mut(&pkid) {
            if let Some(waiter) = waiters.iter_mut().find(|w| !w.released) {
                waiter.released = true;
            }
        }
    }

    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) arrived for `pkid`
    pub fn on_ack(&self, pkid: u16) {
        let waiter = self
            .inflight
            .get_mut(&pkid)
            .and_then(|mut waiters| waiters.pop_front());
        self.inflight.remove_if(&pkid, |_, waiters| waiters.is_empty());

        match waiter {
            Some(waiter) => {
                let _ = waiter.tx.send(());
            }
            None => debug!(pkid, "Ack without a waiter"),
        }
    }

    /// The connection dropped. Every id with an unreleased waiter will be
    /// sent again once the session resumes.
    pub fn on_connection_lost(&self) {
        let mut resend = self.resend.lock();
        resend.clear();
        resend.extend(
            self.inflight
                .iter()
                .filter(|entry| entry.value().iter().any(|w| !w.released))
                .map(|entry| *entry.key()),
        );
    }

    /// Waiters not yet bound to a packet id
    pub fn queued(&self) -> usize {
        self.queued.lock().len()
    }

    /// Waiters bound to a packet id, awaiting acknowledgment
    pub fn inflight(&self) -> usize {
        self.inflight.iter().map(|entry| entry.value().len()).sum()
    }
}

/// Completion handle for one publish
pub struct PublishAck {
    inner: AckState,
}

enum AckState {
    Done(Result<(), TransportError>),
    Pending {
        rx: oneshot::Receiver<()>,
        timeout: Duration,
    },
}

impl PublishAck {
    /// Already-resolved handle
    pub fn ready(result: Result<(), TransportError>) -> Self {
        Self {
            inner: AckState::Done(result),
        }
    }

    pub(crate) fn pending(rx: oneshot::Receiver<()>, timeout: Duration) -> Self {
        Self {
            inner: AckState::Pending { rx, timeout },
        }
    }

    /// Wait until the broker acknowledges, bounded by the ack timeout
    pub async fn wait(self) -> Result<(), TransportError> {
        match self.inner {
            AckState::Done(result) => result,
            AckState::Pending { rx, timeout } => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(TransportError::AckDropped),
                Err(_) => Err(TransportError::AckTimeout(timeout)),
            },
        }
    }
}
