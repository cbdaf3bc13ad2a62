//! Store senders.

use std::time::Duration;

use async_trait::async_trait;
use questdb::ingress::Sender;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::error::{PersistenceError, Result};
use super::line::LineBuffer;
use crate::config::StoreConfig;

/// Writes a buffer of rows to the store. Owned by exactly one writer.
///
/// On success the buffer is cleared. On failure the sender decides whether
/// the rows stay in the buffer for the next flush or are dropped.
#[async_trait]
pub trait StoreSender: Send {
    async fn flush(&mut self, buffer: &mut LineBuffer) -> Result<()>;
}

/// Line protocol over TCP through the store's ingestion client.
///
/// The client does blocking IO, so connect and flush run on the blocking
/// pool with the sender and buffer moved in and back out.
pub struct TcpLineSender {
    conf: String,
    addr: String,
    sender: Option<Sender>,
    connect_timeout: Duration,
    max_buffer_bytes: usize,
}

impl TcpLineSender {
    /// Sender that connects on its first flush
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let addr = super::conf_addr(&config.conf)?;
        Ok(Self {
            conf: config.conf.clone(),
            addr,
            sender: None,
            connect_timeout: config.connect_timeout,
            max_buffer_bytes: config.max_buffer_bytes,
        })
    }

    /// Connect eagerly; failure here is a startup error
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut sender = Self::new(config)?;
        let connected = sender.open().await?;
        sender.sender = Some(connected);
        Ok(sender)
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_some()
    }

    async fn open(&self) -> Result<Sender> {
        let conf = self.conf.clone();
        let connect = spawn_blocking(move || Sender::from_conf(conf));
        let sender = timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| PersistenceError::ConnectTimeout(self.addr.clone()))?
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
        info!(addr = %self.addr, "Connected to store");
        Ok(sender)
    }

    async fn ship(&mut self, buffer: &mut LineBuffer) -> Result<()> {
        let mut sender = match self.sender.take() {
            Some(sender) => sender,
            None => self.open().await?,
        };

        let mut pending = std::mem::take(buffer);
        let (sender, pending, result) = spawn_blocking(move || {
            let result = sender.flush(pending.encoded_mut());
            (sender, pending, result)
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        *buffer = pending;
        result?;
        if !sender.must_close() {
            self.sender = Some(sender);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreSender for TcpLineSender {
    async fn flush(&mut self, buffer: &mut LineBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let rows = buffer.row_count();
        let bytes = buffer.len();
        match self.ship(buffer).await {
            Ok(()) => {
                debug!(rows, bytes, "Flushed rows");
                buffer.clear();
                Ok(())
            }
            Err(e) => {
                // Reconnect on the next flush
                self.sender = None;
                if buffer.len() > self.max_buffer_bytes {
                    let discarded = PersistenceError::Discarded {
                        bytes: buffer.len(),
                        rows: buffer.row_count(),
                    };
                    warn!(error = %e, "Store flush failed, buffer over limit");
                    buffer.clear();
                    return Err(discarded);
                }
                Err(e)
            }
        }
    }
}
