//! Coordinator configuration

use crate::{types::AspectRatio, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables shared by every session and view of a [`Coordinator`](crate::Coordinator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Stalls shorter than this are never exposed as `buffering` (milliseconds)
    pub buffering_debounce_ms: u64,
    /// Bounded number of Picture-in-Picture entry attempts
    pub pip_retry_attempts: u32,
    /// Delay between Picture-in-Picture entry attempts (milliseconds)
    pub pip_retry_backoff_ms: u64,
    /// Period of the session-scoped position ticker (milliseconds)
    pub position_interval_ms: u64,
    /// Step used by OS skip-forward/backward commands (milliseconds)
    pub skip_interval_ms: u64,
    /// PiP aspect hint used before the decoded size is known
    pub default_aspect_ratio: AspectRatio,
    /// Capacity of native, session and host event channels
    pub event_channel_capacity: usize,
    /// HTTP manifest fetch timeout (milliseconds)
    pub manifest_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            buffering_debounce_ms: 400,
            pip_retry_attempts: 3,
            pip_retry_backoff_ms: 175,
            position_interval_ms: 500,
            skip_interval_ms: 10_000,
            default_aspect_ratio: AspectRatio::WIDESCREEN,
            event_channel_capacity: 256,
            manifest_timeout_ms: 10_000,
        }
    }
}

impl CoordinatorConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reject values the coordinator cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.pip_retry_attempts == 0 {
            return Err(Error::InvalidConfig("pip_retry_attempts must be at least 1".into()));
        }
        if self.position_interval_ms == 0 {
            return Err(Error::InvalidConfig("position_interval_ms must be non-zero".into()));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::InvalidConfig("event_channel_capacity must be non-zero".into()));
        }
        if self.default_aspect_ratio.width == 0 || self.default_aspect_ratio.height == 0 {
            return Err(Error::InvalidConfig("default_aspect_ratio must be non-degenerate".into()));
        }
        Ok(())
    }

    pub fn buffering_debounce(&self) -> Duration {
        Duration::from_millis(self.buffering_debounce_ms)
    }

    pub fn pip_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.pip_retry_backoff_ms)
    }

    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }

    pub fn skip_interval(&self) -> Duration {
        Duration::from_millis(self.skip_interval_ms)
    }

    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_millis(self.manifest_timeout_ms)
    }
}
