//! Batched persistence writers
//!
//! One writer per event category. Each owns its queue's receive end, its
//! row buffer and its store sender; nothing else touches them.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::event::Category;
use crate::metrics::Metrics;
use crate::queue::EventReceiver;
use crate::store::{LineBuffer, StoreSender, ToRows};


/// Drains one category queue into the store on a fixed cadence
pub struct PersistenceWriter<T, S> {
    rx: EventReceiver<T>,
    sender: S,
    buffer: LineBuffer,
    flush_interval: Duration,
    metrics: Arc<Metrics>,
}

impl<T, S> PersistenceWriter<T, S>
where
    T: ToRows + Send + 'static,
    S: StoreSender + 'static,
{
    pub fn new(
        rx: EventReceiver<T>,
        sender: S,
        flush_interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            rx,
            sender,
            buffer: LineBuffer::new(),
            flush_interval,
            metrics,
        }
    }

    /// Spawn the writer loop as a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until every producer is gone, flushing on each tick and once more
    /// after the queue closes
    pub async fn run(mut self) {
        let category = self.rx.category();
        let mut interval = tokio::time::interval(self.flush_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(%category, interval = ?self.flush_interval, "Writer started");

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    match event {
                        Some(event) => self.append(category, &event),
                        None => {
                            // Channel closed, flush remaining and exit
                            self.flush(category).await;
                            break;
                        }
                    }
                }

                _ = interval.tick() => {
                    self.flush(category).await;
                }
            }
        }

        info!(%category, "Writer stopped");
    }

    fn append(&mut self, category: Category, event: &T) {
        for row in event.to_rows() {
            match self.buffer.append(&row) {
                Ok(()) => self.metrics.row_appended(row.table),
                Err(e) => {
                    warn!(%category, table = row.table, error = %e, "Skipping row");
                    self.metrics.row_rejected(row.table);
                }
            }
        }
    }

    async fn flush(&mut self, category: Category) {
        let rows = self.buffer.row_count();
        let result = self.sender.flush(&mut self.buffer).await;
        self.metrics.queue_depth(category, self.rx.len());
        match result {
            Ok(()) => {
                if rows > 0 {
                    debug!(%category, rows, "Flushed batch");
                }
                self.metrics.flush_completed(category, true);
            }
            Err(e) => {
                error!(
                    %category,
                    rows,
                    retained = self.buffer.row_count(),
                    error = %e,
                    "Failed to flush batch"
                );
                self.metrics.flush_completed(category, false);
            }
        }
    }
}
