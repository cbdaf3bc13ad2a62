//! Operator requests and the command payloads derived from them.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DeviceIdentity, DownloadEvent, DownloadStatus};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignedUrl {
    pub url: String,
    pub timeout: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileInfo {
    pub id: i64,
    pub file_hash: String,
    pub size: i64,
}

/// A downloadable artifact: where to fetch it and how to verify it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Content {
    pub signed_url: SignedUrl,
    pub file_info: FileInfo,
}

/// `POST /api/firmwares/deployment`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FirmwareDeployRequest {
    pub command_id: String,
    pub content: Option<Content>,
    pub devices: Vec<DeviceIdentity>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `POST /api/advertisements/deployment`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdsDeployRequest {
    pub command_id: String,
    pub contents: Vec<Content>,
    pub devices: Vec<DeviceIdentity>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// `POST /api/firmwares/deployment/cancel`
///
/// The command id is read from `commandId` or `command_id`. A body carrying
/// both spellings is a duplicate field and fails to parse.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    #[serde(rename = "commandId", alias = "command_id")]
    pub command_id: String,
    pub reason: String,
    pub devices: Vec<DeviceIdentity>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct FirmwareDownloadCommand<'a> {
    command_id: &'a str,
    content: &'a Content,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct AdsDownloadCommand<'a> {
    command_id: &'a str,
    contents: &'a [Content],
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct DownloadCancelCommand<'a> {
    command_id: &'a str,
    reason: &'a str,
    timestamp: DateTime<Utc>,
}

/// Kind of command sent to devices; decides the topic suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Firmware,
    Advertisement,
    Cancel,
}

impl CommandKind {
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            CommandKind::Firmware => "update/request/firmware",
            CommandKind::Advertisement => "update/request/advertisement",
            CommandKind::Cancel => "update/cancel",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Firmware => "firmware",
            CommandKind::Advertisement => "advertisement",
            CommandKind::Cancel => "cancel",
        }
    }
}

/// One operator request turned into a wire payload. Built once, then shared
/// read-only by every per-device publish.
#[derive(Debug, Clone)]
pub struct Command {
    pub id: String,
    pub kind: CommandKind,
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
    provisional_status: DownloadStatus,
    provisional_message: String,
    total_bytes: i64,
}

impl Command {
    pub fn firmware(req: &FirmwareDeployRequest, content: &Content) -> serde_json::Result<Self> {
        let timestamp = req.timestamp.unwrap_or_else(Utc::now);
        let payload = serde_json::to_vec(&FirmwareDownloadCommand {
            command_id: &req.command_id,
            content,
            timestamp,
        })?;
        Ok(Self {
            id: req.command_id.clone(),
            kind: CommandKind::Firmware,
            payload: Bytes::from(payload),
            timestamp,
            provisional_status: DownloadStatus::Waiting,
            provisional_message: "Download Command".to_string(),
            total_bytes: content.file_info.size,
        })
    }

    pub fn advertisements(req: &AdsDeployRequest) -> serde_json::Result<Self> {
        let timestamp = req.timestamp.unwrap_or_else(Utc::now);
        let payload = serde_json::to_vec(&AdsDownloadCommand {
            command_id: &req.command_id,
            contents: &req.contents,
            timestamp,
        })?;
        Ok(Self {
            id: req.command_id.clone(),
            kind: CommandKind::Advertisement,
            payload: Bytes::from(payload),
            timestamp,
            provisional_status: DownloadStatus::Waiting,
            provisional_message: "Download Command".to_string(),
            total_bytes: req
                .contents
                .iter()
                .map(|c| c.file_info.size)
                .fold(0i64, |total, size| total.saturating_add(size)),
        })
    }

    pub fn cancel(req: &CancelRequest) -> serde_json::Result<Self> {
        let timestamp = req.timestamp.unwrap_or_else(Utc::now);
        let payload = serde_json::to_vec(&DownloadCancelCommand {
            command_id: &req.command_id,
            reason: &req.reason,
            timestamp,
        })?;
        Ok(Self {
            id: req.command_id.clone(),
            kind: CommandKind::Cancel,
            payload: Bytes::from(payload),
            timestamp,
            provisional_status: DownloadStatus::Canceled,
            provisional_message: req.reason.clone(),
            total_bytes: 0,
        })
    }

    /// Intent record for `device`, enqueued before the publish is confirmed
    pub fn provisional_event(&self, device: DeviceIdentity) -> DownloadEvent {
        let mut event = DownloadEvent::new(
            self.id.clone(),
            device,
            self.provisional_status.clone(),
            self.provisional_message.clone(),
            Utc::now(),
        );
        event.total_bytes = self.total_bytes;
        event
    }
}
