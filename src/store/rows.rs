//! Mapping from canonical events to store rows.

use chrono::{DateTime, Utc};
use smallvec::SmallVec;

use crate::event::{
    DownloadEvent, ErrorLogEvent, HealthStatusEvent, NetworkStatusEvent, SalesEvent,
    SystemStatusEvent,
};
use crate::topic::DeviceIdentity;

pub const DOWNLOAD_EVENTS: &str = "download_events";
pub const SYSTEM_STATUS: &str = "system_status";
pub const NETWORK_STATUS: &str = "network_status";
pub const ADVERTISEMENT_STATUS: &str = "advertisement_status";
pub const FIRMWARE_STATUS: &str = "firmware_status";
pub const HEALTH_STATUS: &str = "health_status";
pub const ERROR_LOGS: &str = "error_logs";
pub const SALES_DATA: &str = "sales_data";

/// Typed column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Timestamp(DateTime<Utc>),
}

/// One row bound for a table. Symbols always precede columns on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub table: &'static str,
    pub symbols: SmallVec<[(&'static str, String); 4]>,
    pub columns: SmallVec<[(&'static str, Value); 8]>,
    pub timestamp: DateTime<Utc>,
}

impl Row {
    pub fn new(table: &'static str, timestamp: DateTime<Utc>) -> Self {
        Self {
            table,
            symbols: SmallVec::new(),
            columns: SmallVec::new(),
            timestamp,
        }
    }

    /// Empty values are left out; the store reads a missing symbol as null
    pub fn symbol(mut self, name: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.symbols.push((name, value));
        }
        self
    }

    pub fn int(mut self, name: &'static str, value: i64) -> Self {
        self.columns.push((name, Value::Int(value)));
        self
    }

    pub fn float(mut self, name: &'static str, value: f64) -> Self {
        self.columns.push((name, Value::Float(value)));
        self
    }

    pub fn boolean(mut self, name: &'static str, value: bool) -> Self {
        self.columns.push((name, Value::Bool(value)));
        self
    }

    pub fn string(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.columns.push((name, Value::Str(value.into())));
        self
    }

    pub fn timestamp_column(mut self, name: &'static str, value: DateTime<Utc>) -> Self {
        self.columns.push((name, Value::Timestamp(value)));
        self
    }

    /// Device id, plus group/region ids when the topic layout carries them
    pub fn device(mut self, device: &DeviceIdentity) -> Self {
        self = self.int("device_id", device.device_id);
        if let Some(group) = device.group_id {
            self = self.int("group_id", group);
        }
        if let Some(region) = device.region_id {
            self = self.int("region_id", region);
        }
        self
    }
}

pub type Rows = SmallVec<[Row; 2]>;

/// Events that can be persisted
pub trait ToRows {
    fn to_rows(&self) -> Rows;
}

impl ToRows for DownloadEvent {
    fn to_rows(&self) -> Rows {
        let row = Row::new(DOWNLOAD_EVENTS, self.timestamp)
            .symbol("command_id", self.command_id.as_str())
            .symbol("message", self.message.as_str())
            .symbol("status", self.status.as_str())
            .device(&self.device)
            .int("progress", self.progress)
            .int("total_bytes", self.total_bytes)
            .int("download_bytes", self.downloaded_bytes)
            .float("speed_kbps", self.speed_kbps)
            .boolean("checksum_verified", self.checksum_verified)
            .int("download_ms", self.download_ms);
        smallvec::smallvec![row]
    }
}

impl ToRows for SystemStatusEvent {
    fn to_rows(&self) -> Rows {
        let mut rows = Rows::new();
        rows.push(
            Row::new(SYSTEM_STATUS, self.timestamp)
                .device(&self.device)
                .float("cpu_core_0", self.cpu_core_0)
                .float("cpu_core_1", self.cpu_core_1)
                .float("memory_usage", self.memory_usage)
                .float("storage_usage", self.storage_usage)
                .int("uptime", self.uptime),
        );

        if let Some(network) = &self.network {
            rows.push(
                Row::new(NETWORK_STATUS, self.timestamp)
                    .device(&self.device)
                    .string("connection_type", network.connection_type.as_str())
                    .int("signal_strength", network.signal_strength)
                    .string("local_ip", network.local_ip.as_str())
                    .string("gateway_ip", network.gateway_ip.as_str()),
            );
        }

        for ad_id in &self.advertisement_ids {
            rows.push(
                Row::new(ADVERTISEMENT_STATUS, self.timestamp)
                    .device(&self.device)
                    .int("ad_id", *ad_id),
            );
        }

        if let Some(version) = &self.firmware_version {
            rows.push(
                Row::new(FIRMWARE_STATUS, self.timestamp)
                    .device(&self.device)
                    .string("firmware_version", version.as_str()),
            );
        }

        rows
    }
}

impl ToRows for NetworkStatusEvent {
    fn to_rows(&self) -> Rows {
        let row = Row::new(NETWORK_STATUS, self.timestamp)
            .device(&self.device)
            .string("connection_type", self.connection_type.as_str())
            .int("signal_strength", self.signal_strength)
            .string("local_ip", self.ip_address.as_str())
            .string("gateway_ip", self.gateway.as_str());
        smallvec::smallvec![row]
    }
}

impl ToRows for HealthStatusEvent {
    fn to_rows(&self) -> Rows {
        let mut row = Row::new(HEALTH_STATUS, self.timestamp)
            .symbol("overall_status", self.overall_status.as_str())
            .device(&self.device)
            .string("firmware_version", self.firmware_version.as_str())
            .int("error_count", self.error_count)
            .int("warning_count", self.warning_count);
        if let Some(last_reboot) = self.last_reboot {
            row = row.timestamp_column("last_reboot", last_reboot);
        }
        smallvec::smallvec![row]
    }
}

impl ToRows for ErrorLogEvent {
    fn to_rows(&self) -> Rows {
        let row = Row::new(ERROR_LOGS, self.timestamp)
            .device(&self.device)
            .string("error_tag", self.error_tag.as_str())
            .string("log", self.log.as_str());
        smallvec::smallvec![row]
    }
}

impl ToRows for SalesEvent {
    fn to_rows(&self) -> Rows {
        let row = Row::new(SALES_DATA, self.timestamp)
            .device(&self.device)
            .string("type", self.kind.as_str())
            .string("sub_type", self.sub_kind.as_str());
        smallvec::smallvec![row]
    }
}
