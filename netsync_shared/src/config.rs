//! Configuration system.
//!
//! Loads synchronization settings from JSON strings/files. Every field has a
//! default, so a config file only needs the values it changes.

use std::{num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Client synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Authoritative peer address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_player_name")]
    pub player_name: String,
    /// Local fixed update rate.
    #[serde(default = "default_update_hz")]
    pub update_hz: u32,
    /// Clock probe cadence.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: i64,
    /// Minimum change before a new ping estimate replaces the stored one.
    #[serde(default = "default_ping_hysteresis_ms")]
    pub ping_hysteresis_ms: i64,
    /// Fixed rendering delay absorbing arrival jitter.
    #[serde(default = "default_dejitter_ms")]
    pub dejitter_ms: f64,
    /// Samples kept per interpolated variable, in ticks.
    #[serde(default = "default_horizon_ticks")]
    pub interpolation_horizon_ticks: u32,
    /// Queue frames applied per update at most. `None` drains everything.
    #[serde(default)]
    pub max_frames_per_update: Option<NonZeroUsize>,
    /// Decoded frames waiting to be applied at most, handshake wait included.
    /// Overflowing it closes the connection.
    #[serde(default = "default_max_queued_frames")]
    pub max_queued_frames: usize,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_update_hz() -> u32 {
    60
}

fn default_ping_interval_ms() -> i64 {
    2_000
}

fn default_ping_hysteresis_ms() -> i64 {
    4
}

fn default_dejitter_ms() -> f64 {
    100.0
}

fn default_horizon_ticks() -> u32 {
    64
}

fn default_max_queued_frames() -> usize {
    1_024
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            player_name: default_player_name(),
            update_hz: default_update_hz(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_hysteresis_ms: default_ping_hysteresis_ms(),
            dejitter_ms: default_dejitter_ms(),
            interpolation_horizon_ticks: default_horizon_ticks(),
            max_frames_per_update: None,
            max_queued_frames: default_max_queued_frames(),
        }
    }
}

impl SyncConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects settings the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queued_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "max_queued_frames",
                reason: "must be at least 1",
            });
        }
        if !self.dejitter_ms.is_finite() || self.dejitter_ms < 0.0 {
            return Err(ConfigError::Invalid {
                field: "dejitter_ms",
                reason: "must be a non-negative number",
            });
        }
        Ok(())
    }

    /// Reads and parses a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}
