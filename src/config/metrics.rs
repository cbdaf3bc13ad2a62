//! Metrics configuration

use serde::Deserialize;

/// Metrics configuration. When enabled, the operator API also serves
/// `/metrics`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics are exposed
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
