//! Media engine boundary
//!
//! The media engine is the SFU that terminates WebRTC (ICE/DTLS/SRTP) and
//! forwards RTP. It lives outside this crate; the orchestrator only drives
//! its transport, producer and consumer lifecycles through [`MediaEngine`].
//!
//! ```text
//!   browser ──WebRTC──► [ingress transport] ─► producer ─┬─► consumer ─► [egress transport] ──► browser
//!                                                         │
//!                                                         └─► paused consumer ─► [plain transport] ──RTP──► transcoder
//! ```
//!
//! [`EngineAdapter`] is the thin façade the rest of the crate calls; it fixes
//! the loop-back options for transcoder egress and logs failures.
//! [`MemoryEngine`] is an in-process engine that tracks every resource it
//! hands out, used for tests and dry runs.

pub mod adapter;
pub mod memory;
pub mod types;

use std::net::IpAddr;

use async_trait::async_trait;

pub use adapter::EngineAdapter;
pub use memory::{EngineEvent, MemoryEngine, Resource};
pub use types::{
    default_media_codecs, ConsumerId, ConsumerParameters, DtlsFingerprint, DtlsParameters,
    IceCandidate, IceParameters, MediaKind, ProducerId, RtcpFeedback, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpParameters, TransportId, TransportParameters,
};

use crate::error::EngineError;

/// Transport, producer and consumer primitives of the external media engine
///
/// Close operations are idempotent: closing an unknown id is a no-op.
/// Closing a transport closes every producer and consumer created on it, and
/// closing a producer closes its consumers.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Codecs the engine's router can negotiate
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Create a WebRTC transport for a browser peer
    async fn create_webrtc_transport(&self) -> Result<TransportParameters, EngineError>;

    /// Complete DTLS setup of a WebRTC transport
    async fn connect_webrtc_transport(
        &self,
        transport: &TransportId,
        dtls: DtlsParameters,
    ) -> Result<(), EngineError>;

    /// Create a plain RTP transport (no SRTP, RTCP muxed, no comedia)
    async fn create_plain_transport(&self, listen_ip: IpAddr) -> Result<TransportId, EngineError>;

    /// Point a plain transport at a remote RTP endpoint
    async fn connect_plain_transport(
        &self,
        transport: &TransportId,
        ip: IpAddr,
        port: u16,
    ) -> Result<(), EngineError>;

    /// Start receiving a track from a peer
    async fn produce(
        &self,
        transport: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, EngineError>;

    /// Whether a receiver with these capabilities can decode the producer
    fn can_consume(&self, producer: &ProducerId, capabilities: &RtpCapabilities) -> bool;

    /// Forward a producer's media over a transport
    async fn consume(
        &self,
        transport: &TransportId,
        producer: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerParameters, EngineError>;

    async fn resume_consumer(&self, consumer: &ConsumerId) -> Result<(), EngineError>;

    /// Ask the producing endpoint for a key frame on behalf of a consumer
    async fn request_key_frame(&self, consumer: &ConsumerId) -> Result<(), EngineError>;

    async fn close_consumer(&self, consumer: &ConsumerId);

    async fn close_producer(&self, producer: &ProducerId);

    async fn close_transport(&self, transport: &TransportId);
}
