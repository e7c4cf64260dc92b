//! Configuration for the data file layer
//!
//! Centralized tuning knobs with sensible defaults. Loading these values is
//! the host's job; `Config` derives serde traits so it can be embedded in the
//! host's own configuration.

use serde::{Deserialize, Serialize};

use crate::codec::MAX_RECORD_HEADER_LEN;
use crate::error::{DataFileError, Result};

/// Main configuration for a data file collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Writer Configuration
    // -------------------------------------------------------------------------
    /// Size of each memory-mapped window the writer appends into (in bytes).
    /// A single encoded data item larger than this is rejected.
    pub mapped_window_size: usize,

    // -------------------------------------------------------------------------
    // Reader Configuration
    // -------------------------------------------------------------------------
    /// Max number of open file handles per data file reader
    pub max_file_channels: usize,

    /// In-flight reads per open handle before another handle is opened
    pub threads_per_file_channel: usize,

    /// Size of the first positional read of a data item (in bytes).
    /// Items that fit are returned without a second read.
    pub read_probe_size: usize,

    /// Number of probe buffers each reader keeps for reuse
    pub read_buffer_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mapped_window_size: 64 * 1024 * 1024, // 64 MB
            max_file_channels: 8,
            threads_per_file_channel: 8,
            read_probe_size: 4 * 1024, // 4 KB
            read_buffer_pool_size: 32,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that every knob holds a usable value
    pub fn validate(&self) -> Result<()> {
        if self.mapped_window_size <= MAX_RECORD_HEADER_LEN {
            return Err(DataFileError::Config(format!(
                "mapped_window_size must exceed {} bytes, got {}",
                MAX_RECORD_HEADER_LEN, self.mapped_window_size
            )));
        }
        if self.max_file_channels == 0 {
            return Err(DataFileError::Config(
                "max_file_channels must be at least 1".to_string(),
            ));
        }
        if self.threads_per_file_channel == 0 {
            return Err(DataFileError::Config(
                "threads_per_file_channel must be at least 1".to_string(),
            ));
        }
        if self.read_probe_size < MAX_RECORD_HEADER_LEN {
            return Err(DataFileError::Config(format!(
                "read_probe_size must be at least {} bytes, got {}",
                MAX_RECORD_HEADER_LEN, self.read_probe_size
            )));
        }
        if self.read_buffer_pool_size == 0 {
            return Err(DataFileError::Config(
                "read_buffer_pool_size must be at least 1".to_string(),
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
    /// Set the writer's mapped window size (in bytes)
    pub fn mapped_window_size(mut self, size: usize) -> Self {
        self.config.mapped_window_size = size;
        self
    }

    /// Set the maximum number of open handles per reader
    pub fn max_file_channels(mut self, count: usize) -> Self {
        self.config.max_file_channels = count;
        self
    }

    /// Set how many in-flight reads share one handle before growing the pool
    pub fn threads_per_file_channel(mut self, count: usize) -> Self {
        self.config.threads_per_file_channel = count;
        self
    }

    /// Set the probe read size (in bytes)
    pub fn read_probe_size(mut self, size: usize) -> Self {
        self.config.read_probe_size = size;
        self
    }

    /// Set the number of pooled probe buffers per reader
    pub fn read_buffer_pool_size(mut self, count: usize) -> Self {
        self.config.read_buffer_pool_size = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
