//! In-process media engine
//!
//! Tracks transports, producers and consumers without moving any media.
//! Every acquire and release is appended to an event log so callers can check
//! that resources handed out are eventually given back.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::EngineError;

use super::types::{
    default_media_codecs, ConsumerId, ConsumerParameters, DtlsFingerprint, DtlsParameters,
    IceCandidate, IceParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportId, TransportParameters,
};
use super::MediaEngine;

/// A resource owned by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Transport(TransportId),
    Producer(ProducerId),
    Consumer(ConsumerId),
}

/// Entry in the engine's event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Acquired(Resource),
    Released(Resource),
    Connected(TransportId),
    KeyFrameRequested(ConsumerId),
    Resumed(ConsumerId),
}

#[derive(Debug)]
struct TransportEntry {
    plain: bool,
    connected: bool,
}

#[derive(Debug)]
struct ProducerEntry {
    transport: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

#[derive(Debug)]
struct ConsumerEntry {
    transport: TransportId,
    producer: ProducerId,
    paused: bool,
}

#[derive(Debug, Default)]
struct EngineState {
    transports: HashMap<TransportId, TransportEntry>,
    producers: HashMap<ProducerId, ProducerEntry>,
    consumers: HashMap<ConsumerId, ConsumerEntry>,
    events: Vec<EngineEvent>,
}

impl EngineState {
    fn remove_consumer(&mut self, id: &ConsumerId) {
        if self.consumers.remove(id).is_some() {
            self.events
                .push(EngineEvent::Released(Resource::Consumer(id.clone())));
        }
    }

    fn remove_producer(&mut self, id: &ProducerId) {
        if self.producers.remove(id).is_none() {
            return;
        }
        let orphans: Vec<ConsumerId> = self
            .consumers
            .iter()
            .filter(|(_, c)| &c.producer == id)
            .map(|(cid, _)| cid.clone())
            .collect();
        for cid in orphans {
            self.remove_consumer(&cid);
        }
        self.events
            .push(EngineEvent::Released(Resource::Producer(id.clone())));
    }
}

/// Engine that keeps all state in memory
pub struct MemoryEngine {
    capabilities: RtpCapabilities,
    state: Mutex<EngineState>,
    next_id: AtomicU64,
    latency: Duration,
}

impl MemoryEngine {
    /// Engine with the default codec set
    pub fn new() -> Self {
        Self {
            capabilities: RtpCapabilities {
                codecs: default_media_codecs(),
                header_extensions: Vec::new(),
            },
            state: Mutex::new(EngineState::default()),
            next_id: AtomicU64::new(1),
            latency: Duration::ZERO,
        }
    }

    /// Suspend every async operation for `latency`, so concurrent callers interleave
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<EngineEvent> {
        self.state.lock().events.clone()
    }

    /// Resources currently held
    pub fn live_resources(&self) -> Vec<Resource> {
        let state = self.state.lock();
        let mut live: Vec<Resource> = Vec::new();
        live.extend(state.transports.keys().cloned().map(Resource::Transport));
        live.extend(state.producers.keys().cloned().map(Resource::Producer));
        live.extend(state.consumers.keys().cloned().map(Resource::Consumer));
        live
    }

    pub fn producer_count(&self) -> usize {
        self.state.lock().producers.len()
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    pub fn transport_count(&self) -> usize {
        self.state.lock().transports.len()
    }

    /// Whether the consumer exists and is paused
    pub fn is_paused(&self, consumer: &ConsumerId) -> Option<bool> {
        self.state.lock().consumers.get(consumer).map(|c| c.paused)
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn suspend(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn insert_transport(&self, plain: bool) -> TransportId {
        let id = TransportId::new(self.next_id("transport"));
        let mut state = self.state.lock();
        state.transports.insert(
            id.clone(),
            TransportEntry {
                plain,
                connected: false,
            },
        );
        state
            .events
            .push(EngineEvent::Acquired(Resource::Transport(id.clone())));
        id
    }

    fn mark_connected(&self, transport: &TransportId, plain: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let entry = state
            .transports
            .get_mut(transport)
            .filter(|t| t.plain == plain)
            .ok_or_else(|| EngineError::TransportNotFound(transport.clone()))?;
        if entry.connected {
            return Err(EngineError::AlreadyConnected(transport.clone()));
        }
        entry.connected = true;
        state.events.push(EngineEvent::Connected(transport.clone()));
        Ok(())
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for MemoryEngine {
    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.capabilities.clone()
    }

    async fn create_webrtc_transport(&self) -> Result<TransportParameters, EngineError> {
        self.suspend().await;
        let id = self.insert_transport(false);
        Ok(TransportParameters {
            ice_parameters: IceParameters {
                username_fragment: format!("ufrag-{}", id),
                password: format!("pwd-{}", id),
                ice_lite: Some(true),
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".into(),
                priority: 1_076_302_079,
                ip: "127.0.0.1".into(),
                protocol: "udp".into(),
                port: 40_000,
                candidate_type: "host".into(),
                tcp_type: None,
            }],
            dtls_parameters: DtlsParameters {
                role: Some("auto".into()),
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".into(),
                    value: "00:11:22:33".into(),
                }],
            },
            id,
        })
    }

    async fn connect_webrtc_transport(
        &self,
        transport: &TransportId,
        _dtls: DtlsParameters,
    ) -> Result<(), EngineError> {
        self.suspend().await;
        self.mark_connected(transport, false)
    }

    async fn create_plain_transport(&self, _listen_ip: IpAddr) -> Result<TransportId, EngineError> {
        self.suspend().await;
        Ok(self.insert_transport(true))
    }

    async fn connect_plain_transport(
        &self,
        transport: &TransportId,
        _ip: IpAddr,
        _port: u16,
    ) -> Result<(), EngineError> {
        self.suspend().await;
        self.mark_connected(transport, true)
    }

    async fn produce(
        &self,
        transport: &TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, EngineError> {
        self.suspend().await;

        let codec = rtp_parameters
            .primary_codec()
            .ok_or_else(|| EngineError::UnsupportedCodec("no media codec".into()))?;
        if !self.capabilities.supports(&codec.mime_type) {
            return Err(EngineError::UnsupportedCodec(codec.mime_type.clone()));
        }

        let id = ProducerId::new(self.next_id("producer"));
        let mut state = self.state.lock();
        if !state.transports.contains_key(transport) {
            return Err(EngineError::TransportNotFound(transport.clone()));
        }
        state.producers.insert(
            id.clone(),
            ProducerEntry {
                transport: transport.clone(),
                kind,
                rtp_parameters,
            },
        );
        state
            .events
            .push(EngineEvent::Acquired(Resource::Producer(id.clone())));
        Ok(id)
    }

    fn can_consume(&self, producer: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        let state = self.state.lock();
        state
            .producers
            .get(producer)
            .and_then(|p| p.rtp_parameters.primary_codec())
            .is_some_and(|codec| capabilities.supports(&codec.mime_type))
    }

    async fn consume(
        &self,
        transport: &TransportId,
        producer: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<ConsumerParameters, EngineError> {
        self.suspend().await;

        let id = ConsumerId::new(self.next_id("consumer"));
        let mut state = self.state.lock();
        if !state.transports.contains_key(transport) {
            return Err(EngineError::TransportNotFound(transport.clone()));
        }
        let source = state
            .producers
            .get(producer)
            .ok_or_else(|| EngineError::ProducerNotFound(producer.clone()))?;
        let codec = source
            .rtp_parameters
            .primary_codec()
            .filter(|c| capabilities.supports(&c.mime_type))
            .cloned()
            .ok_or_else(|| EngineError::CannotConsume(producer.clone()))?;

        let params = ConsumerParameters {
            id: id.clone(),
            producer_id: producer.clone(),
            kind: source.kind,
            rtp_parameters: RtpParameters {
                mid: Some(id.to_string()),
                codecs: vec![codec],
                ..source.rtp_parameters.clone()
            },
            consumer_type: "simple".into(),
        };
        state.consumers.insert(
            id.clone(),
            ConsumerEntry {
                transport: transport.clone(),
                producer: producer.clone(),
                paused,
            },
        );
        state
            .events
            .push(EngineEvent::Acquired(Resource::Consumer(id)));
        Ok(params)
    }

    async fn resume_consumer(&self, consumer: &ConsumerId) -> Result<(), EngineError> {
        self.suspend().await;
        let mut state = self.state.lock();
        let entry = state
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| EngineError::ConsumerNotFound(consumer.clone()))?;
        entry.paused = false;
        state.events.push(EngineEvent::Resumed(consumer.clone()));
        Ok(())
    }

    async fn request_key_frame(&self, consumer: &ConsumerId) -> Result<(), EngineError> {
        self.suspend().await;
        let mut state = self.state.lock();
        if !state.consumers.contains_key(consumer) {
            return Err(EngineError::ConsumerNotFound(consumer.clone()));
        }
        state
            .events
            .push(EngineEvent::KeyFrameRequested(consumer.clone()));
        Ok(())
    }

    async fn close_consumer(&self, consumer: &ConsumerId) {
        self.state.lock().remove_consumer(consumer);
    }

    async fn close_producer(&self, producer: &ProducerId) {
        self.state.lock().remove_producer(producer);
    }

    async fn close_transport(&self, transport: &TransportId) {
        let mut state = self.state.lock();
        if state.transports.remove(transport).is_none() {
            return;
        }
        let consumers: Vec<ConsumerId> = state
            .consumers
            .iter()
            .filter(|(_, c)| &c.transport == transport)
            .map(|(id, _)| id.clone())
            .collect();
        for id in consumers {
            state.remove_consumer(&id);
        }
        let producers: Vec<ProducerId> = state
            .producers
            .iter()
            .filter(|(_, p)| &p.transport == transport)
            .map(|(id, _)| id.clone())
            .collect();
        for id in producers {
            state.remove_producer(&id);
        }
        state
            .events
            .push(EngineEvent::Released(Resource::Transport(transport.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RtpCodecParameters;

    fn h264_parameters() -> RtpParameters {
        RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "video/H264".into(),
                payload_type: 97,
                clock_rate: 90_000,
                channels: None,
                parameters: Default::default(),
                rtcp_feedback: vec![],
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_produce_requires_transport() {
        let engine = MemoryEngine::new();
        let result = engine
            .produce(&TransportId::new("missing"), MediaKind::Video, h264_parameters())
            .await;
        assert!(matches!(result, Err(EngineError::TransportNotFound(_))));
    }

    #[tokio::test]
    async fn test_unsupported_codec_rejected() {
        let engine = MemoryEngine::new();
        let transport = engine.create_webrtc_transport().await.unwrap().id;
        let mut params = h264_parameters();
        params.codecs[0].mime_type = "video/AV1".into();

        let result = engine.produce(&transport, MediaKind::Video, params).await;
        assert!(matches!(result, Err(EngineError::UnsupportedCodec(_))));
    }

    #[tokio::test]
    async fn test_close_transport_cascades() {
        let engine = MemoryEngine::new();
        let ingress = engine.create_webrtc_transport().await.unwrap().id;
        let producer = engine
            .produce(&ingress, MediaKind::Video, h264_parameters())
            .await
            .unwrap();
        let egress = engine
            .create_plain_transport("127.0.0.1".parse().unwrap())
            .await
            .unwrap();
        let caps = engine.rtp_capabilities();
        engine.consume(&egress, &producer, &caps, true).await.unwrap();
        assert_eq!(engine.consumer_count(), 1);

        // Closing the producer's transport takes the producer and its consumer with it
        engine.close_transport(&ingress).await;
        assert_eq!(engine.producer_count(), 0);
        assert_eq!(engine.consumer_count(), 0);
        assert_eq!(engine.transport_count(), 1);

        // Idempotent
        engine.close_transport(&ingress).await;
        engine.close_transport(&egress).await;
        assert!(engine.live_resources().is_empty());
    }

    #[tokio::test]
    async fn test_plain_transport_connects_once() {
        let engine = MemoryEngine::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let transport = engine.create_plain_transport(ip).await.unwrap();

        engine.connect_plain_transport(&transport, ip, 4000).await.unwrap();
        let again = engine.connect_plain_transport(&transport, ip, 4000).await;
        assert!(matches!(again, Err(EngineError::AlreadyConnected(_))));
    }

    #[tokio::test]
    async fn test_can_consume_checks_capabilities() {
        let engine = MemoryEngine::new();
        let transport = engine.create_webrtc_transport().await.unwrap().id;
        let producer = engine
            .produce(&transport, MediaKind::Video, h264_parameters())
            .await
            .unwrap();

        assert!(engine.can_consume(&producer, &engine.rtp_capabilities()));
        assert!(!engine.can_consume(&producer, &RtpCapabilities::default()));
        assert!(!engine.can_consume(&ProducerId::new("gone"), &engine.rtp_capabilities()));
    }

    #[tokio::test]
    async fn test_paused_consumer_resume() {
        let engine = MemoryEngine::new();
        let ingress = engine.create_webrtc_transport().await.unwrap().id;
        let producer = engine
            .produce(&ingress, MediaKind::Video, h264_parameters())
            .await
            .unwrap();
        let caps = engine.rtp_capabilities();
        let consumer = engine.consume(&ingress, &producer, &caps, true).await.unwrap();

        assert_eq!(engine.is_paused(&consumer.id), Some(true));
        engine.request_key_frame(&consumer.id).await.unwrap();
        engine.resume_consumer(&consumer.id).await.unwrap();
        assert_eq!(engine.is_paused(&consumer.id), Some(false));

        let events = engine.events();
        let n = events.len();
        assert_eq!(events[n - 2], EngineEvent::KeyFrameRequested(consumer.id.clone()));
        assert_eq!(events[n - 1], EngineEvent::Resumed(consumer.id));
    }
}
