//! Time-series store client.
//!
//! Rows are encoded as line protocol by the `questdb` ingestion client,
//! buffered per writer and shipped over TCP on flush.
//!
//! - `LineBuffer` - per-writer row buffer with atomic row appends
//! - `ToRows` - event to table mapping
//! - `StoreSender` / `TcpLineSender` - flush transport

mod error;
mod line;
pub mod rows;
mod sender;

pub use error::{PersistenceError, Result};
pub use line::LineBuffer;
pub use rows::{Row, Rows, ToRows, Value};
pub use sender::{StoreSender, TcpLineSender};


/// Address of a TCP connection string, e.g. `tcp::addr=localhost:9009;`.
///
/// The client parses the full string on connect; this only rejects what the
/// TCP sender cannot use.
pub fn conf_addr(conf: &str) -> Result<String> {
    let (protocol, params) = conf
        .trim()
        .split_once("::")
        .ok_or_else(|| PersistenceError::Conf(format!("missing '::' in {:?}", conf)))?;

    if !matches!(protocol, "tcp" | "tcps") {
        return Err(PersistenceError::Conf(format!(
            "unsupported protocol {:?}",
            protocol
        )));
    }

    params
        .split(';')
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim() == "addr")
        .map(|(_, value)| value.trim().to_string())
        .filter(|addr| !addr.is_empty())
        .ok_or_else(|| PersistenceError::Conf("missing addr".to_string()))
}
