//! Peer configuration
//!
//! Every field has a default, so an empty JSON object `{}` is a valid config.
//! The CLI loads this from `--config <file>` and layers flags on top.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};

/// Default capacity for each peer's event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default minimum spacing between published telemetry samples
pub const DEFAULT_MIN_METRICS_INTERVAL_MS: u64 = 1_000;

/// Settings shared by controller and sensor peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerConfig {
    /// Name used in log output and JSONL file names (defaults to the role)
    pub instance_name: Option<String>,
    /// Capacity of the observer event channel (lagging observers lose events)
    pub event_channel_capacity: usize,
    /// Sensor drops samples published closer together than this; 0 disables
    pub min_metrics_interval_ms: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            instance_name: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            min_metrics_interval_ms: DEFAULT_MIN_METRICS_INTERVAL_MS,
        }
    }
}

impl PeerConfig {
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = Some(name.into());
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn with_min_metrics_interval(mut self, interval: Duration) -> Self {
        self.min_metrics_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Metrics throttle window, `None` when throttling is disabled
    pub fn min_metrics_interval(&self) -> Option<Duration> {
        (self.min_metrics_interval_ms > 0).then(|| Duration::from_millis(self.min_metrics_interval_ms))
    }

    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> LinkResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LinkError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> LinkResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    fn validate(&self) -> LinkResult<()> {
        if self.event_channel_capacity == 0 {
            return Err(LinkError::Config(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
