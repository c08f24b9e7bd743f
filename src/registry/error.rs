//! Registry error types

use thiserror::Error;

use super::entry::StreamId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No stream with this identifier
    #[error("stream not found: {0}")]
    StreamNotFound(StreamId),

    /// Identifier already registered
    #[error("stream already registered: {0}")]
    DuplicateStream(StreamId),

    /// File name would escape the stream directory
    #[error("invalid segment name: {0:?}")]
    InvalidSegmentName(String),
}
