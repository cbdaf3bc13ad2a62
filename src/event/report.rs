//! Payload shapes published by devices.
//!
//! Unknown fields are ignored and absent numeric fields default to zero.
//! Download reports must name the command they belong to.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::DownloadStatus;

/// Inbound payload could not be decoded
#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "invalid payload: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Json(e) => Some(e),
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Json(e)
    }
}

/// Decode a JSON payload into a report shape
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}

/// `update/request/ack` and `update/cancel/ack`
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadAck {
    pub command_id: String,
    #[serde(default)]
    pub status: Option<DownloadStatus>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `update/progress`
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadProgress {
    pub command_id: String,
    #[serde(default)]
    pub progress: i64,
    #[serde(default)]
    pub downloaded_bytes: i64,
    #[serde(default)]
    pub total_bytes: i64,
    #[serde(default)]
    pub speed_kbps: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// `update/result`
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadResult {
    pub command_id: String,
    #[serde(default)]
    pub status: Option<DownloadStatus>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub checksum_verified: bool,
    #[serde(default)]
    pub download_ms: Option<i64>,
    /// Older firmware reports whole seconds
    #[serde(default)]
    pub download_seconds: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl DownloadResult {
    pub fn elapsed_ms(&self) -> i64 {
        match (self.download_ms, self.download_seconds) {
            (Some(ms), _) => ms,
            (None, Some(secs)) => secs.saturating_mul(1000),
            (None, None) => 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AdvertisementRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CpuUsage {
    pub core_0: f64,
    pub core_1: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SystemMetrics {
    pub cpu_usage: CpuUsage,
    pub memory_usage: f64,
    pub storage_usage: f64,
    pub uptime: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NetworkReport {
    pub connection_type: String,
    pub signal_strength: i64,
    pub local_ip: String,
    pub gateway_ip: String,
}

/// `status/system`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SystemStatusReport {
    pub firmware_version: Option<String>,
    pub advertisements: Vec<AdvertisementRef>,
    pub system: SystemMetrics,
    pub network: Option<NetworkReport>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `status/network`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct NetworkStatusReport {
    pub connection_type: String,
    pub signal_strength: i64,
    #[serde(alias = "local_ip")]
    pub ip_address: String,
    #[serde(alias = "gateway_ip")]
    pub gateway: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `status/health`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HealthStatusReport {
    pub overall_status: String,
    pub firmware_version: String,
    pub last_reboot: Option<DateTime<Utc>>,
    pub error_count: i64,
    pub warning_count: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `status/error_log`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ErrorLogReport {
    pub error_tag: String,
    pub log: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `sales/data`
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SalesReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub sub_type: String,
    pub timestamp: Option<DateTime<Utc>>,
}
