//! Inbound topic routes and report-to-event mapping

use chrono::{DateTime, Utc};

use crate::event::report::{
    decode, DownloadAck, DownloadProgress, DownloadResult, ErrorLogReport, HealthStatusReport,
    NetworkStatusReport, SalesReport, SystemStatusReport,
};
use crate::event::{
    Category, DecodeError, DownloadEvent, DownloadStatus, ErrorLogEvent, Event, HealthStatusEvent,
    NetworkSnapshot, NetworkStatusEvent, SalesEvent, SystemStatusEvent,
};
use crate::topic::DeviceIdentity;

pub const REQUEST_ACK_MESSAGE: &str = "[Download Request Received]";
pub const CANCEL_ACK_MESSAGE: &str = "[Download Cancel Request Received]";
pub const PROGRESS_MESSAGE: &str = "[Download in progress]";

/// One subscribed topic suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    RequestAck,
    CancelAck,
    Progress,
    Result,
    SystemStatus,
    NetworkStatus,
    HealthStatus,
    ErrorLog,
    Sales,
}

impl RouteKind {
    pub const ALL: [RouteKind; 9] = [
        RouteKind::RequestAck,
        RouteKind::CancelAck,
        RouteKind::Progress,
        RouteKind::Result,
        RouteKind::SystemStatus,
        RouteKind::NetworkStatus,
        RouteKind::HealthStatus,
        RouteKind::ErrorLog,
        RouteKind::Sales,
    ];

    /// Topic levels after the device identity
    pub fn suffix(&self) -> &'static str {
        match self {
            RouteKind::RequestAck => "update/request/ack",
            RouteKind::CancelAck => "update/cancel/ack",
            RouteKind::Progress => "update/progress",
            RouteKind::Result => "update/result",
            RouteKind::SystemStatus => "status/system",
            RouteKind::NetworkStatus => "status/network",
            RouteKind::HealthStatus => "status/health",
            RouteKind::ErrorLog => "status/error_log",
            RouteKind::Sales => "sales/data",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            RouteKind::RequestAck
            | RouteKind::CancelAck
            | RouteKind::Progress
            | RouteKind::Result => Category::Download,
            RouteKind::SystemStatus => Category::SystemStatus,
            RouteKind::NetworkStatus => Category::NetworkStatus,
            RouteKind::HealthStatus => Category::HealthStatus,
            RouteKind::ErrorLog => Category::ErrorLog,
            RouteKind::Sales => Category::Sales,
        }
    }
}

/// A decoded device report, not yet tied to a device
#[derive(Debug, Clone)]
pub enum Report {
    RequestAck(DownloadAck),
    CancelAck(DownloadAck),
    Progress(DownloadProgress),
    Result(DownloadResult),
    SystemStatus(SystemStatusReport),
    NetworkStatus(NetworkStatusReport),
    HealthStatus(HealthStatusReport),
    ErrorLog(ErrorLogReport),
    Sales(SalesReport),
}

impl Report {
    /// Decode `payload` with the shape expected on `kind`'s topic
    pub fn decode(kind: RouteKind, payload: &[u8]) -> Result<Self, DecodeError> {
        Ok(match kind {
            RouteKind::RequestAck => Report::RequestAck(decode(payload)?),
            RouteKind::CancelAck => Report::CancelAck(decode(payload)?),
            RouteKind::Progress => Report::Progress(decode(payload)?),
            RouteKind::Result => Report::Result(decode(payload)?),
            RouteKind::SystemStatus => Report::SystemStatus(decode(payload)?),
            RouteKind::NetworkStatus => Report::NetworkStatus(decode(payload)?),
            RouteKind::HealthStatus => Report::HealthStatus(decode(payload)?),
            RouteKind::ErrorLog => Report::ErrorLog(decode(payload)?),
            RouteKind::Sales => Report::Sales(decode(payload)?),
        })
    }

    /// Canonical event for `device`
    pub fn into_event(self, device: DeviceIdentity) -> Event {
        match self {
            Report::RequestAck(ack) => Event::Download(ack_event(ack, device, REQUEST_ACK_MESSAGE)),
            Report::CancelAck(ack) => Event::Download(ack_event(ack, device, CANCEL_ACK_MESSAGE)),
            Report::Progress(p) => {
                // Devices may send any status here; progress is always in progress
                let mut event = DownloadEvent::new(
                    p.command_id,
                    device,
                    DownloadStatus::InProgress,
                    PROGRESS_MESSAGE,
                    stamp(p.timestamp),
                );
                event.progress = p.progress;
                event.total_bytes = p.total_bytes;
                event.downloaded_bytes = p.downloaded_bytes;
                event.speed_kbps = p.speed_kbps;
                Event::Download(event)
            }
            Report::Result(r) => {
                let download_ms = r.elapsed_ms();
                let status = r
                    .status
                    .unwrap_or_else(|| DownloadStatus::Other(String::new()));
                let mut event =
                    DownloadEvent::new(r.command_id, device, status, r.message, stamp(r.timestamp));
                event.checksum_verified = r.checksum_verified;
                event.download_ms = download_ms;
                Event::Download(event)
            }
            Report::SystemStatus(s) => Event::SystemStatus(SystemStatusEvent {
                device,
                firmware_version: s.firmware_version.filter(|v| !v.is_empty()),
                advertisement_ids: s.advertisements.iter().map(|a| a.id).collect(),
                cpu_core_0: s.system.cpu_usage.core_0,
                cpu_core_1: s.system.cpu_usage.core_1,
                memory_usage: s.system.memory_usage,
                storage_usage: s.system.storage_usage,
                uptime: s.system.uptime,
                network: s.network.map(|n| NetworkSnapshot {
                    connection_type: n.connection_type,
                    signal_strength: n.signal_strength,
                    local_ip: n.local_ip,
                    gateway_ip: n.gateway_ip,
                }),
                timestamp: stamp(s.timestamp),
            }),
            Report::NetworkStatus(n) => Event::NetworkStatus(NetworkStatusEvent {
                device,
                connection_type: n.connection_type,
                signal_strength: n.signal_strength,
                ip_address: n.ip_address,
                gateway: n.gateway,
                timestamp: stamp(n.timestamp),
            }),
            Report::HealthStatus(h) => Event::HealthStatus(HealthStatusEvent {
                device,
                overall_status: h.overall_status,
                firmware_version: h.firmware_version,
                last_reboot: h.last_reboot,
                error_count: h.error_count,
                warning_count: h.warning_count,
                timestamp: stamp(h.timestamp),
            }),
            Report::ErrorLog(e) => Event::ErrorLog(ErrorLogEvent {
                device,
                error_tag: e.error_tag,
                log: e.log,
                timestamp: stamp(e.timestamp),
            }),
            Report::Sales(s) => Event::Sales(SalesEvent {
                device,
                kind: s.kind,
                sub_kind: s.sub_type,
                timestamp: stamp(s.timestamp),
            }),
        }
    }
}

/// Decode and map in one step
pub fn normalize(
    kind: RouteKind,
    payload: &[u8],
    device: DeviceIdentity,
) -> Result<Event, DecodeError> {
    Ok(Report::decode(kind, payload)?.into_event(device))
}

fn ack_event(ack: DownloadAck, device: DeviceIdentity, message: &str) -> DownloadEvent {
    let status = ack.status.unwrap_or(DownloadStatus::Acknowledged);
    DownloadEvent::new(ack.command_id, device, status, message, stamp(ack.timestamp))
}

fn stamp(reported: Option<DateTime<Utc>>) -> DateTime<Utc> {
    reported.unwrap_or_else(Utc::now)
}
