//! Recovery Settings
//!
//! Tunables for the byte stream to recovering copies. Settings are
//! immutable once a coordinator is built from them.

use super::errors::{RecoveryError, RecoveryResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Recovery source settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySettings {
    /// File chunk size for full-copy recoveries (default: 512 KiB)
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,

    /// Node-wide byte budget across all sessions (default: 40 MiB/s).
    ///
    /// `0` disables throttling.
    #[serde(default = "default_max_bytes_per_sec")]
    pub max_bytes_per_sec: u64,

    /// Upper bound on the estimated size of one op batch (default: 512 KiB)
    #[serde(default = "default_ops_batch_size_bytes")]
    pub ops_batch_size_bytes: u64,
}

fn default_chunk_size_bytes() -> u64 {
    512 * 1024
}

fn default_max_bytes_per_sec() -> u64 {
    40 * 1024 * 1024
}

fn default_ops_batch_size_bytes() -> u64 {
    512 * 1024
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size_bytes(),
            max_bytes_per_sec: default_max_bytes_per_sec(),
            ops_batch_size_bytes: default_ops_batch_size_bytes(),
        }
    }
}

impl RecoverySettings {
    /// Settings with throttling disabled.
    pub fn unthrottled() -> Self {
        Self {
            max_bytes_per_sec: 0,
            ..Default::default()
        }
    }

    /// Validate the settings.
    pub fn validate(&self) -> RecoveryResult<()> {
        if self.chunk_size_bytes == 0 {
            return Err(RecoveryError::Configuration(
                "chunk_size_bytes must be greater than zero".to_string(),
            ));
        }
        if self.ops_batch_size_bytes == 0 {
            return Err(RecoveryError::Configuration(
                "ops_batch_size_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate settings from JSON.
    pub fn from_json_str(json: &str) -> RecoveryResult<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| RecoveryError::Configuration(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> RecoveryResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            RecoveryError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Check if throttling is enabled.
    pub fn is_throttled(&self) -> bool {
        self.max_bytes_per_sec > 0
    }
}
