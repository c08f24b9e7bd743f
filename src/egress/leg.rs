//! Egress legs
//!
//! One leg carries one producer's RTP from the engine to the transcoder:
//!
//! ```text
//! producer ─► consumer (paused) ─► plain transport ──RTP──► 127.0.0.1:port ─► transcoder
//! ```
//!
//! The consumer starts paused so nothing is sent before the transcoder
//! listens; the supervisor resumes it once the port is bound.

use std::net::IpAddr;

use crate::engine::{ConsumerId, EngineAdapter, ProducerId, TransportId};
use crate::error::TranscoderError;
use crate::peer::PeerId;

use super::port::{PortAllocator, PortLease};
use super::sdp::SessionDescription;

/// Producer feeding a leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegSource {
    pub peer: PeerId,
    pub producer: ProducerId,
}

impl LegSource {
    pub fn new(peer: PeerId, producer: ProducerId) -> Self {
        Self { peer, producer }
    }
}

/// Open loop-back path from one producer to the transcoder
#[derive(Debug)]
pub struct EgressLeg {
    pub source: LegSource,
    pub transport: TransportId,
    pub consumer: ConsumerId,
    pub description: SessionDescription,
    lease: PortLease,
}

impl EgressLeg {
    /// Allocate a port, create the plain transport and a paused consumer,
    /// and point the transport at the port
    ///
    /// On failure everything acquired so far is released.
    pub async fn open(
        adapter: &EngineAdapter,
        ports: &PortAllocator,
        source: LegSource,
    ) -> Result<Self, TranscoderError> {
        let lease = ports.allocate()?;
        let transport = adapter.create_loopback_egress_transport().await?;

        match Self::attach(adapter, &transport, &source, lease.port()).await {
            Ok((consumer, description)) => {
                tracing::debug!(
                    peer = %source.peer,
                    producer = %source.producer,
                    port = lease.port(),
                    "Egress leg opened"
                );
                Ok(Self {
                    source,
                    transport,
                    consumer,
                    description,
                    lease,
                })
            }
            Err(e) => {
                adapter.release_transport(&transport).await;
                Err(e)
            }
        }
    }

    async fn attach(
        adapter: &EngineAdapter,
        transport: &TransportId,
        source: &LegSource,
        port: u16,
    ) -> Result<(ConsumerId, SessionDescription), TranscoderError> {
        let consumer = adapter
            .consume_producer(transport, &source.producer, true)
            .await?;
        let codec = consumer
            .rtp_parameters
            .primary_codec()
            .ok_or(TranscoderError::NoCodec)?;
        let address: IpAddr = adapter.loopback();
        let description = SessionDescription::from_codec(consumer.kind, codec, address, port);

        adapter.connect(transport, address, port).await?;

        Ok((consumer.id, description))
    }

    /// RTP port the transcoder listens on
    pub fn port(&self) -> u16 {
        self.lease.port()
    }

    /// Codec name from the session description
    pub fn codec_name(&self) -> &str {
        &self.description.codec_name
    }

    /// Close the consumer and transport; the port is freed when the leg drops
    pub async fn release(self, adapter: &EngineAdapter) {
        adapter.release_consumer(&self.consumer).await;
        adapter.release_transport(&self.transport).await;
        tracing::debug!(port = self.port(), peer = %self.source.peer, "Egress leg released");
    }
}
