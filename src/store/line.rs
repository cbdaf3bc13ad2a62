//! Row buffer over the store's line protocol encoder.
//!
//! Appending is atomic per row: a row the encoder refuses half way leaves
//! the buffer exactly as it was.

use chrono::{DateTime, Utc};
use questdb::ingress::{Buffer, TimestampMicros, TimestampNanos};

use super::error::{PersistenceError, Result};
use super::rows::{Row, Value};

/// Rows accumulated since the last flush
pub struct LineBuffer {
    inner: Buffer,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            inner: Buffer::new(),
        }
    }

    /// Append one row, or leave the buffer untouched on error
    pub fn append(&mut self, row: &Row) -> Result<()> {
        if row.columns.is_empty() {
            return Err(PersistenceError::EmptyRow(row.table));
        }
        let nanos = timestamp_nanos(&row.timestamp)?;

        self.inner.set_marker()?;
        match self.write_row(row, nanos) {
            Ok(()) => {
                self.inner.clear_marker();
                Ok(())
            }
            Err(e) => {
                self.inner.rewind_to_marker()?;
                Err(e.into())
            }
        }
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.inner.row_count()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub(super) fn encoded_mut(&mut self) -> &mut Buffer {
        &mut self.inner
    }

    fn write_row(&mut self, row: &Row, nanos: i64) -> questdb::Result<()> {
        let buf = &mut self.inner;
        buf.table(row.table)?;

        for (name, value) in &row.symbols {
            buf.symbol(*name, value.as_str())?;
        }

        for (name, value) in &row.columns {
            match value {
                Value::Int(v) => buf.column_i64(*name, *v)?,
                Value::Float(v) => buf.column_f64(*name, *v)?,
                Value::Bool(v) => buf.column_bool(*name, *v)?,
                Value::Str(v) => buf.column_str(*name, v.as_str())?,
                Value::Timestamp(ts) => {
                    buf.column_ts(*name, TimestampMicros::new(ts.timestamp_micros()))?
                }
            };
        }

        buf.at(TimestampNanos::new(nanos))
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineBuffer")
            .field("rows", &self.row_count())
            .field("bytes", &self.len())
            .finish()
    }
}

fn timestamp_nanos(ts: &DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| PersistenceError::InvalidValue(format!("timestamp {} out of range", ts)))
}
