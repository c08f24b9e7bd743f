//! Façade over the media engine
//!
//! Everything the orchestrator asks of the engine goes through here, so
//! egress options are fixed in one place and every failure is logged once.

use std::net::IpAddr;
use std::sync::Arc;

use crate::error::EngineError;

use super::types::{
    ConsumerId, ConsumerParameters, DtlsParameters, MediaKind, ProducerId, RtpCapabilities,
    RtpParameters, TransportId, TransportParameters,
};
use super::MediaEngine;

/// Cloneable handle to the media engine
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn MediaEngine>,
    loopback: IpAddr,
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("loopback", &self.loopback)
            .finish_non_exhaustive()
    }
}

impl EngineAdapter {
    /// Wrap an engine; egress transports listen on and send to `loopback`
    pub fn new(engine: Arc<dyn MediaEngine>, loopback: IpAddr) -> Self {
        Self { engine, loopback }
    }

    /// Loop-back address egress RTP is sent to
    pub fn loopback(&self) -> IpAddr {
        self.loopback
    }

    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.engine.rtp_capabilities()
    }

    pub async fn create_webrtc_transport(&self) -> Result<TransportParameters, EngineError> {
        self.engine
            .create_webrtc_transport()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to create WebRTC transport"))
    }

    pub async fn connect_webrtc_transport(
        &self,
        transport: &TransportId,
        dtls: DtlsParameters,
    ) -> Result<(), EngineError> {
        self.engine
            .connect_webrtc_transport(transport, dtls)
            .await
            .inspect_err(|e| {
                tracing::error!(transport = %transport, error = %e, "Failed to connect transport")
            })
    }

    pub async fn produce(
        &self,
        transport: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, EngineError> {
        self.engine
            .produce(transport, kind, rtp_parameters)
            .await
            .inspect_err(|e| {
                tracing::error!(transport = %transport, kind = %kind, error = %e, "Produce failed")
            })
    }

    pub fn can_consume(&self, producer: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        self.engine.can_consume(producer, capabilities)
    }

    /// Consume on behalf of a browser peer, using its receive capabilities
    pub async fn consume_for_peer(
        &self,
        transport: &TransportId,
        producer: &ProducerId,
        capabilities: &RtpCapabilities,
    ) -> Result<ConsumerParameters, EngineError> {
        self.engine
            .consume(transport, producer, capabilities, false)
            .await
            .inspect_err(|e| {
                tracing::error!(producer = %producer, error = %e, "Consume failed")
            })
    }

    /// Create a plain transport for feeding a transcoder on the loop-back address
    pub async fn create_loopback_egress_transport(&self) -> Result<TransportId, EngineError> {
        self.engine
            .create_plain_transport(self.loopback)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Failed to create egress transport"))
    }

    /// Send an egress transport's RTP to `ip:port`
    pub async fn connect(
        &self,
        transport: &TransportId,
        ip: IpAddr,
        port: u16,
    ) -> Result<(), EngineError> {
        self.engine
            .connect_plain_transport(transport, ip, port)
            .await
            .inspect_err(|e| {
                tracing::error!(transport = %transport, port = port, error = %e, "Failed to connect egress transport")
            })
    }

    /// Consume a producer on an egress transport with the router's own capabilities
    pub async fn consume_producer(
        &self,
        transport: &TransportId,
        producer: &ProducerId,
        paused: bool,
    ) -> Result<ConsumerParameters, EngineError> {
        let capabilities = self.engine.rtp_capabilities();
        self.engine
            .consume(transport, producer, &capabilities, paused)
            .await
            .inspect_err(|e| {
                tracing::error!(producer = %producer, error = %e, "Egress consume failed")
            })
    }

    pub async fn resume(&self, consumer: &ConsumerId) -> Result<(), EngineError> {
        self.engine.resume_consumer(consumer).await
    }

    pub async fn request_key_frame(&self, consumer: &ConsumerId) -> Result<(), EngineError> {
        self.engine.request_key_frame(consumer).await
    }

    pub async fn release_consumer(&self, consumer: &ConsumerId) {
        self.engine.close_consumer(consumer).await;
    }

    pub async fn release_producer(&self, producer: &ProducerId) {
        self.engine.close_producer(producer).await;
    }

    pub async fn release_transport(&self, transport: &TransportId) {
        self.engine.close_transport(transport).await;
    }
}
