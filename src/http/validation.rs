//! Operator request decoding and required-field checks

use std::fmt;

use crate::event::{AdsDeployRequest, CancelRequest, FirmwareDeployRequest};

#[derive(Debug)]
pub enum ValidationError {
    /// Body is not the expected JSON shape
    Parse(serde_json::Error),
    /// A required field is absent or empty
    Missing(&'static str),
}

impl ValidationError {
    /// Text returned to the operator
    pub fn description(&self) -> &'static str {
        match self {
            ValidationError::Parse(_) => "parse error",
            ValidationError::Missing(_) => "missing required fields",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Parse(e) => write!(f, "Invalid request body: {}", e),
            ValidationError::Missing(field) => write!(f, "Missing required field: {}", field),
        }
    }
}

impl std::error::Error for ValidationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ValidationError::Parse(e) => Some(e),
            ValidationError::Missing(_) => None,
        }
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(e: serde_json::Error) -> Self {
        ValidationError::Parse(e)
    }
}

pub fn firmware_request(body: &[u8]) -> Result<FirmwareDeployRequest, ValidationError> {
    let req: FirmwareDeployRequest = serde_json::from_slice(body)?;
    require(!req.command_id.is_empty(), "command_id")?;
    let has_url = req
        .content
        .as_ref()
        .is_some_and(|c| !c.signed_url.url.is_empty());
    require(has_url, "content.signed_url.url")?;
    require(!req.devices.is_empty(), "devices")?;
    Ok(req)
}

pub fn advertisement_request(body: &[u8]) -> Result<AdsDeployRequest, ValidationError> {
    let req: AdsDeployRequest = serde_json::from_slice(body)?;
    require(!req.command_id.is_empty(), "command_id")?;
    require(!req.contents.is_empty(), "contents")?;
    require(!req.devices.is_empty(), "devices")?;
    Ok(req)
}

pub fn cancel_request(body: &[u8]) -> Result<CancelRequest, ValidationError> {
    let req: CancelRequest = serde_json::from_slice(body)?;
    require(!req.command_id.is_empty(), "commandId")?;
    require(!req.reason.is_empty(), "reason")?;
    require(!req.devices.is_empty(), "devices")?;
    Ok(req)
}

fn require(present: bool, field: &'static str) -> Result<(), ValidationError> {
    if present {
        Ok(())
    } else {
        Err(ValidationError::Missing(field))
    }
}
