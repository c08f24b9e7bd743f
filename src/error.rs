//! Error types
//!
//! Each concern has its own error enum; [`Error`] wraps them for callers that
//! drive the whole server.

use std::io;

use thiserror::Error;

use crate::engine::{ConsumerId, ProducerId, TransportId};
use crate::registry::RegistryError;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Transcoder(#[from] TranscoderError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Operation rejected by the media engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("transport not found: {0}")]
    TransportNotFound(TransportId),

    #[error("producer not found: {0}")]
    ProducerNotFound(ProducerId),

    #[error("consumer not found: {0}")]
    ConsumerNotFound(ConsumerId),

    #[error("transport already connected: {0}")]
    AlreadyConnected(TransportId),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("cannot consume producer {0} with the given capabilities")]
    CannotConsume(ProducerId),

    #[error("media engine rejected request: {0}")]
    Rejected(String),
}

/// Failure reported to a signaling client
///
/// Every variant is non-fatal for the server; the peer stays connected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("streaming room full")]
    RoomFull,

    #[error("{0} already produced")]
    AlreadyProduced(crate::engine::MediaKind),

    #[error("{0} transport not found")]
    TransportNotFound(crate::peer::TransportRole),

    #[error("peer not connected")]
    PeerNotConnected,

    #[error("producer not found")]
    ProducerNotFound,

    #[error("cannot consume producer {0}")]
    CannotConsume(ProducerId),

    #[error("media engine error: {0}")]
    Engine(#[from] EngineError),
}

impl SignalingError {
    /// Stable wire code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::RoomFull => "room-full",
            SignalingError::AlreadyProduced(_) => "already-produced",
            SignalingError::TransportNotFound(_) => "transport-not-found",
            SignalingError::PeerNotConnected => "peer-not-connected",
            SignalingError::ProducerNotFound => "producer-not-found",
            SignalingError::CannotConsume(_) => "cannot-consume",
            SignalingError::Engine(_) => "engine-error",
        }
    }

    /// Admission errors (room full, already produced)
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            SignalingError::RoomFull | SignalingError::AlreadyProduced(_)
        )
    }
}

/// Failure starting or running a transcoder
#[derive(Debug, Error)]
pub enum TranscoderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("no port available in {low}..={high}")]
    NoPortAvailable { low: u16, high: u16 },

    #[error("layout expects {expected} source(s), got {actual}")]
    SourceCount { expected: usize, actual: usize },

    #[error("consumer has no usable codec")]
    NoCodec,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Malformed signaling frame, rejected before reaching the handler
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ProtocolError {
    /// Request id, if the frame carried one
    pub id: Option<u64>,
    /// What was wrong with the frame
    pub reason: String,
}

impl ProtocolError {
    pub(crate) fn new(id: Option<u64>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }

    /// Wire code for the error envelope
    pub fn code(&self) -> &'static str {
        "bad-request"
    }
}
