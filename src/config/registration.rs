//! Device registration forwarding configuration

use std::time::Duration;

use serde::Deserialize;

/// Registration requests are only subscribed to when `backend_url` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Base URL of the device backend, e.g. `http://backend:8080`
    pub backend_url: Option<String>,

    /// Path the request is POSTed to
    pub path: String,

    /// Upper bound on one backend round trip
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// QoS for the registration subscription and the reply publish
    pub qos: u8,

    /// Requests waiting for the forwarder
    pub capacity: usize,
}

impl RegistrationConfig {
    pub fn enabled(&self) -> bool {
        self.backend_url.is_some()
    }

    /// Full backend endpoint, if forwarding is enabled
    pub fn endpoint(&self) -> Option<String> {
        self.backend_url
            .as_deref()
            .map(|base| format!("{}{}", base.trim_end_matches('/'), self.path))
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            path: "/api/devices/register".to_string(),
            timeout: Duration::from_secs(10),
            qos: 1,
            capacity: 1024,
        }
    }
}
