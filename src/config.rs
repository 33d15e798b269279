//! Configuration for segment storage.
//!
//! Limits are normally supplied by an outer configuration layer; this module
//! gives them defaults, a builder, and JSON loading.

use crate::error::{Result, SegmentError};
use crate::storage::index::ENTRY_WIDTH;
use serde::Deserialize;
use std::path::Path;

/// Default store size before a segment reports itself maxed (1 MiB).
pub const DEFAULT_MAX_STORE_BYTES: u64 = 1024 * 1024;

/// Default index capacity (1 MiB, room for 87381 entries).
pub const DEFAULT_MAX_INDEX_BYTES: u64 = 1024 * 1024;

/// Top-level configuration.
///
/// JSON shape:
/// ```text
/// { "segment": { "max_store_bytes": 1048576, "max_index_bytes": 1048576 } }
/// ```
/// Missing fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub segment: SegmentConfig,
}

/// Per-segment size limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Store size (bytes) at which `Segment::is_maxed` turns true.
    pub max_store_bytes: u64,

    /// Index capacity in bytes. The index file is pre-allocated to this
    /// length while open, and `Segment::is_maxed` turns true once no further
    /// whole entry fits.
    pub max_index_bytes: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_store_bytes: DEFAULT_MAX_STORE_BYTES,
            max_index_bytes: DEFAULT_MAX_INDEX_BYTES,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| SegmentError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject limits the storage layer cannot work with.
    ///
    /// The index capacity must hold at least one entry: a zero-length file
    /// cannot be memory-mapped, and a capacity below one entry could never
    /// accept a write.
    pub fn validate(&self) -> Result<()> {
        if self.segment.max_index_bytes < ENTRY_WIDTH {
            return Err(SegmentError::InvalidConfig(format!(
                "max_index_bytes {} is smaller than one index entry ({} bytes)",
                self.segment.max_index_bytes, ENTRY_WIDTH
            )));
        }
        if self.segment.max_index_bytes > usize::MAX as u64 {
            return Err(SegmentError::InvalidConfig(format!(
                "max_index_bytes {} cannot be mapped on this platform",
                self.segment.max_index_bytes
            )));
        }
        if self.segment.max_store_bytes == 0 {
            return Err(SegmentError::InvalidConfig(
                "max_store_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the store size limit (in bytes)
    pub fn max_store_bytes(mut self, bytes: u64) -> Self {
        self.config.segment.max_store_bytes = bytes;
        self
    }

    /// Set the index capacity (in bytes)
    pub fn max_index_bytes(mut self, bytes: u64) -> Self {
        self.config.segment.max_index_bytes = bytes;
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
