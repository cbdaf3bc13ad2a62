//! Topic layout and device identity
//!
//! Devices are addressed positionally: the level(s) right after the fixed
//! prefix carry integer identities.
//!
//! - `device`: `v1/{deviceId}/...`
//! - `region_group_device`: `v1/{regionId}/{groupId}/{deviceId}/...`

pub mod validation;

pub use validation::{topic_matches_filter, validate_topic_filter, validate_topic_name};

use std::fmt;

use serde::{Deserialize, Serialize};


/// Which identity levels follow the topic prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityLayout {
    #[default]
    Device,
    RegionGroupDevice,
}

impl IdentityLayout {
    /// Number of topic levels occupied by the identity
    pub fn levels(&self) -> usize {
        match self {
            IdentityLayout::Device => 1,
            IdentityLayout::RegionGroupDevice => 3,
        }
    }
}

/// Identity of a field device as encoded in its topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(rename = "deviceId")]
    pub device_id: i64,
    #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    #[serde(rename = "regionId", default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<i64>,
}

impl DeviceIdentity {
    pub fn device(device_id: i64) -> Self {
        Self {
            device_id,
            group_id: None,
            region_id: None,
        }
    }

    pub fn scoped(region_id: i64, group_id: i64, device_id: i64) -> Self {
        Self {
            device_id,
            group_id: Some(group_id),
            region_id: Some(region_id),
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.region_id, self.group_id) {
            (Some(region), Some(group)) => write!(f, "{}/{}/{}", region, group, self.device_id),
            _ => write!(f, "{}", self.device_id),
        }
    }
}

/// Topic could not be mapped to a device identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// Topic does not start with the configured prefix
    Prefix { topic: String },
    /// Topic has fewer levels than the layout requires
    MissingLevel { topic: String, level: usize },
    /// Identity level is not an integer
    NotInteger { topic: String, value: String },
    /// Device lacks the group/region ids the layout requires
    Incomplete { device_id: i64 },
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::Prefix { topic } => write!(f, "unexpected prefix in '{}'", topic),
            IdentityError::MissingLevel { topic, level } => {
                write!(f, "topic '{}' has no level {}", topic, level)
            }
            IdentityError::NotInteger { topic, value } => {
                write!(f, "identity '{}' in '{}' is not an integer", value, topic)
            }
            IdentityError::Incomplete { device_id } => {
                write!(f, "device {} has no region/group id", device_id)
            }
        }
    }
}

impl std::error::Error for IdentityError {}

/// Builds device topics and subscription filters, and reads identities
/// back out of inbound topics.
#[derive(Debug, Clone)]
pub struct TopicLayout {
    prefix: String,
    identity: IdentityLayout,
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self::new("v1", IdentityLayout::Device)
    }
}

impl TopicLayout {
    pub fn new(prefix: impl Into<String>, identity: IdentityLayout) -> Self {
        Self {
            prefix: prefix.into(),
            identity,
        }
    }

    pub fn identity_layout(&self) -> IdentityLayout {
        self.identity
    }

    /// Wildcard filter covering every device for a topic suffix,
    /// e.g. `v1/+/update/progress`
    pub fn filter(&self, suffix: &str) -> String {
        let mut filter = self.prefix.clone();
        for _ in 0..self.identity.levels() {
            filter.push_str("/+");
        }
        filter.push('/');
        filter.push_str(suffix);
        filter
    }

    /// Concrete topic for one device, e.g. `v1/42/update/cancel`
    pub fn device_topic(
        &self,
        device: &DeviceIdentity,
        suffix: &str,
    ) -> Result<String, IdentityError> {
        match self.identity {
            IdentityLayout::Device => Ok(format!(
                "{}/{}/{}",
                self.prefix, device.device_id, suffix
            )),
            IdentityLayout::RegionGroupDevice => match (device.region_id, device.group_id) {
                (Some(region), Some(group)) => Ok(format!(
                    "{}/{}/{}/{}/{}",
                    self.prefix, region, group, device.device_id, suffix
                )),
                _ => Err(IdentityError::Incomplete {
                    device_id: device.device_id,
                }),
            },
        }
    }

    /// Read the device identity from fixed level positions of `topic`
    pub fn parse_identity(&self, topic: &str) -> Result<DeviceIdentity, IdentityError> {
        let mut levels = topic.split('/');
        if levels.next() != Some(self.prefix.as_str()) {
            return Err(IdentityError::Prefix {
                topic: topic.to_string(),
            });
        }

        let mut ids = [0i64; 3];
        let count = self.identity.levels();
        for (i, slot) in ids.iter_mut().take(count).enumerate() {
            let value = levels.next().ok_or_else(|| IdentityError::MissingLevel {
                topic: topic.to_string(),
                level: i + 1,
            })?;
            *slot = value.parse().map_err(|_| IdentityError::NotInteger {
                topic: topic.to_string(),
                value: value.to_string(),
            })?;
        }

        Ok(match self.identity {
            IdentityLayout::Device => DeviceIdentity::device(ids[0]),
            IdentityLayout::RegionGroupDevice => DeviceIdentity::scoped(ids[0], ids[1], ids[2]),
        })
    }

    /// Identity used in place of an unparseable one
    pub fn sentinel(&self) -> DeviceIdentity {
        match self.identity {
            IdentityLayout::Device => DeviceIdentity::device(0),
            IdentityLayout::RegionGroupDevice => DeviceIdentity::scoped(0, 0, 0),
        }
    }
}
