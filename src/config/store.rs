//! Time-series store configuration.

use std::time::Duration;

use serde::Deserialize;

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

/// Store configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection string, e.g. `tcp::addr=localhost:9009;`
    pub conf: String,

    /// Flush interval (e.g., "500ms", "1s")
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Timeout for establishing the store connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Unflushed bytes kept for retry after a failed flush. Anything larger
    /// is discarded.
    pub max_buffer_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            conf: "tcp::addr=localhost:9009;".to_string(),
            flush_interval: default_flush_interval(),
            connect_timeout: Duration::from_secs(5),
            max_buffer_bytes: 8 * 1024 * 1024,
        }
    }
}
