//! Error types for zip-pump

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for zip-pump operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while generating or reading an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// I/O error while writing archive bytes (sink side)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An entry failed to open or read (source side)
    #[error("failed to read entry `{name}`: {source}")]
    Source {
        /// Name of the entry being read
        name: String,
        /// Underlying cause
        #[source]
        source: io::Error,
    },

    /// Invalid ZIP format or structure
    #[error("invalid ZIP format: {0}")]
    InvalidFormat(String),

    /// Entry name rejected by the writer
    #[error("invalid entry name `{name}`: {reason}")]
    InvalidEntryName {
        /// Offending name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// The same entry name was written twice
    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Entry not found in ZIP archive
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Unsupported compression method
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Extracted data does not match the stored CRC-32
    #[error("checksum mismatch for `{name}`: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Entry name
        name: String,
        /// CRC-32 recorded in the central directory
        expected: u32,
        /// CRC-32 of the extracted bytes
        actual: u32,
    },

    /// `next_entry()` called without a preceding successful `has_next()`
    #[error("content source exhausted")]
    SourceExhausted,

    /// Operation not permitted in the generator's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Configuration value out of range
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The consumer closed the generator before it finished
    #[error("generator closed by consumer")]
    Cancelled,

    /// The generator stayed paused longer than the configured idle timeout
    #[error("generator abandoned: paused for longer than {0:?}")]
    Abandoned(Duration),

    /// A blocking worker task panicked or was cancelled
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl ArchiveError {
    /// Create a source error for the named entry
    pub fn source_failed(name: impl Into<String>, source: io::Error) -> Self {
        Self::Source {
            name: name.into(),
            source,
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// True when the failure came from reading an entry
    pub fn is_source_error(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::SourceExhausted)
    }

    /// True when the generator was stopped by its consumer rather than by a failure
    pub fn is_consumer_error(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Abandoned(_) | Self::InvalidState(_)
        )
    }
}
