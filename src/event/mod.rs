//! Canonical event model
//!
//! Every record the gateway persists is one of these events, whether it was
//! reported by a device or synthesized by the dispatcher. Events are plain
//! data; producers hand ownership to a queue and never touch them again.

pub mod command;
pub mod report;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::topic::DeviceIdentity;

pub use command::{
    AdsDeployRequest, CancelRequest, CommandKind, Content, FileInfo, FirmwareDeployRequest,
    SignedUrl,
};
pub use report::DecodeError;


/// Event category; one queue and one writer exist per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Download,
    SystemStatus,
    NetworkStatus,
    HealthStatus,
    ErrorLog,
    Sales,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Download,
        Category::SystemStatus,
        Category::NetworkStatus,
        Category::HealthStatus,
        Category::ErrorLog,
        Category::Sales,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Download => "download",
            Category::SystemStatus => "system_status",
            Category::NetworkStatus => "network_status",
            Category::HealthStatus => "health_status",
            Category::ErrorLog => "error_log",
            Category::Sales => "sales",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download / deployment state of a command on one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Waiting,
    InProgress,
    Acknowledged,
    Success,
    Error,
    Timeout,
    Canceled,
    /// Device-reported value outside the known set, kept verbatim
    Other(String),
}

impl DownloadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DownloadStatus::Waiting => "WAITING",
            DownloadStatus::InProgress => "IN_PROGRESS",
            DownloadStatus::Acknowledged => "ACKNOWLEDGED",
            DownloadStatus::Success => "SUCCESS",
            DownloadStatus::Error => "ERROR",
            DownloadStatus::Timeout => "TIMEOUT",
            DownloadStatus::Canceled => "CANCELED",
            DownloadStatus::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "WAITING" => DownloadStatus::Waiting,
            "IN_PROGRESS" => DownloadStatus::InProgress,
            "ACKNOWLEDGED" => DownloadStatus::Acknowledged,
            "SUCCESS" => DownloadStatus::Success,
            "ERROR" => DownloadStatus::Error,
            "TIMEOUT" => DownloadStatus::Timeout,
            "CANCELED" | "CANCELLED" => DownloadStatus::Canceled,
            other => DownloadStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DownloadStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(DownloadStatus::parse(&s))
    }
}

/// Outcome of a command on one device: provisional (from the dispatcher)
/// or reported (ack, progress, result).
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadEvent {
    pub command_id: String,
    pub device: DeviceIdentity,
    pub message: String,
    pub status: DownloadStatus,
    pub progress: i64,
    pub total_bytes: i64,
    pub downloaded_bytes: i64,
    pub speed_kbps: f64,
    pub checksum_verified: bool,
    pub download_ms: i64,
    pub timestamp: DateTime<Utc>,
}

impl DownloadEvent {
    /// Blank event for `command_id` on `device`; callers fill in what they know.
    pub fn new(
        command_id: impl Into<String>,
        device: DeviceIdentity,
        status: DownloadStatus,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            device,
            message: message.into(),
            status,
            progress: 0,
            total_bytes: 0,
            downloaded_bytes: 0,
            speed_kbps: 0.0,
            checksum_verified: false,
            download_ms: 0,
            timestamp,
        }
    }
}

/// Network details embedded in a system status report
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NetworkSnapshot {
    pub connection_type: String,
    pub signal_strength: i64,
    pub local_ip: String,
    pub gateway_ip: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemStatusEvent {
    pub device: DeviceIdentity,
    pub firmware_version: Option<String>,
    pub advertisement_ids: Vec<i64>,
    pub cpu_core_0: f64,
    pub cpu_core_1: f64,
    pub memory_usage: f64,
    pub storage_usage: f64,
    pub uptime: i64,
    pub network: Option<NetworkSnapshot>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStatusEvent {
    pub device: DeviceIdentity,
    pub connection_type: String,
    pub signal_strength: i64,
    pub ip_address: String,
    pub gateway: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatusEvent {
    pub device: DeviceIdentity,
    pub overall_status: String,
    pub firmware_version: String,
    pub last_reboot: Option<DateTime<Utc>>,
    pub error_count: i64,
    pub warning_count: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLogEvent {
    pub device: DeviceIdentity,
    pub error_tag: String,
    pub log: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SalesEvent {
    pub device: DeviceIdentity,
    pub kind: String,
    pub sub_kind: String,
    pub timestamp: DateTime<Utc>,
}

/// Any canonical event, tagged by category
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Download(DownloadEvent),
    SystemStatus(SystemStatusEvent),
    NetworkStatus(NetworkStatusEvent),
    HealthStatus(HealthStatusEvent),
    ErrorLog(ErrorLogEvent),
    Sales(SalesEvent),
}

impl Event {
    pub fn category(&self) -> Category {
        match self {
            Event::Download(_) => Category::Download,
            Event::SystemStatus(_) => Category::SystemStatus,
            Event::NetworkStatus(_) => Category::NetworkStatus,
            Event::HealthStatus(_) => Category::HealthStatus,
            Event::ErrorLog(_) => Category::ErrorLog,
            Event::Sales(_) => Category::Sales,
        }
    }

    pub fn device(&self) -> &DeviceIdentity {
        match self {
            Event::Download(e) => &e.device,
            Event::SystemStatus(e) => &e.device,
            Event::NetworkStatus(e) => &e.device,
            Event::HealthStatus(e) => &e.device,
            Event::ErrorLog(e) => &e.device,
            Event::Sales(e) => &e.device,
        }
    }
}
