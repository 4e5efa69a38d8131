//! Generator configuration

use crate::error::{ArchiveError, Result};
use crate::writer::CompressionMethod;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default size of the chunks read from each entry
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Configuration for an [`ArchiveGenerator`](crate::ArchiveGenerator)
///
/// Deserializes with every field optional, so it can be embedded in an
/// application config file:
///
/// ```
/// use zip_pump::GeneratorConfig;
///
/// let config: GeneratorConfig =
///     serde_json::from_str(r#"{ "chunk_size": 4096, "idle_timeout_ms": 30000 }"#).unwrap();
/// assert_eq!(config.chunk_size, 4096);
/// assert_eq!(config.buffer_capacity, 8192);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Bytes read from an entry per worker round trip (default: 8192)
    pub chunk_size: usize,
    /// Maximum compressed bytes waiting for the consumer (default: 8192)
    pub buffer_capacity: usize,
    /// Compression method for every entry (default: Deflate)
    pub compression_method: CompressionMethod,
    /// Compression level (default: 6)
    pub compression_level: u32,
    /// Close a generator paused for longer than this (default: never)
    pub idle_timeout_ms: Option<u64>,
    /// Write ZIP64 local headers so entries over 4 GiB stream correctly (default: false)
    pub zip64_entries: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer_capacity: DEFAULT_CHUNK_SIZE,
            compression_method: CompressionMethod::Deflate,
            compression_level: 6,
            idle_timeout_ms: None,
            zip64_entries: false,
        }
    }
}

impl GeneratorConfig {
    /// Set the per-read chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        assert!(size > 0, "chunk_size must be at least 1");
        self.chunk_size = size;
        self
    }

    /// Set the transfer buffer capacity
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "buffer_capacity must be at least 1");
        self.buffer_capacity = capacity;
        self
    }

    /// Set compression method and level
    pub fn with_compression(mut self, method: CompressionMethod, level: u32) -> Self {
        self.compression_method = method;
        self.compression_level = level;
        self
    }

    /// Close the generator with an error when it stays paused this long
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = Some(timeout.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    /// Mark every entry as ZIP64, for archives that may hold entries over 4 GiB
    pub fn with_zip64_entries(mut self, enabled: bool) -> Self {
        self.zip64_entries = enabled;
        self
    }

    /// Idle timeout as a `Duration`
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// Check values that may have come from an untrusted config file
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ArchiveError::invalid_config("chunk_size must be at least 1"));
        }
        if self.buffer_capacity == 0 {
            return Err(ArchiveError::invalid_config(
                "buffer_capacity must be at least 1",
            ));
        }
        let max_level = match self.compression_method {
            CompressionMethod::Stored => u32::MAX,
            CompressionMethod::Deflate => 9,
            #[cfg(feature = "zstd-support")]
            CompressionMethod::Zstd => 21,
        };
        if self.compression_level > max_level {
            return Err(ArchiveError::invalid_config(format!(
                "compression_level {} out of range for {:?} (max {})",
                self.compression_level, self.compression_method, max_level
            )));
        }
        if self.idle_timeout_ms == Some(0) {
            return Err(ArchiveError::invalid_config(
                "idle_timeout_ms must be positive when set",
            ));
        }
        Ok(())
    }
}
