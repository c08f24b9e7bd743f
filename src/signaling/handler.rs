//! Pairing and signaling logic
//!
//! Each request runs as one async call. The peer table lock is never held
//! across an engine call: state is claimed under the lock, the engine is
//! called, and the outcome is re-validated under a fresh lock.
//!
//! ```text
//! produce ─► lock: admit + claim slot ─► engine.produce ─► lock: fill + detect pairing
//!                                                                │
//!                        push peer-joined (self) ◄───────────────┤ paired
//!                        start export (background)               │
//!                        push peer-joined (counterpart) ◄────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::egress::LegSource;
use crate::engine::{
    DtlsParameters, EngineAdapter, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportParameters,
};
use crate::error::SignalingError;
use crate::peer::{ConsumedMedia, PairedSources, PeerId, PeerRegistry, TransportRole, ROOM_CAPACITY};
use crate::registry::StreamId;
use crate::transcoder::{ExportState, Layout, TranscoderSupervisor};

use super::message::{Notifier, Outbound, PushEvent, Reply, Request};

/// Capacity of the call event channel
const EVENT_CAPACITY: usize = 64;

/// Notable state changes, for embedders and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// `peer` was told its counterpart is ready
    PeerJoined { peer: PeerId, counterpart: PeerId },
    PeerLeft { peer: PeerId },
    ExportStarted {
        stream_id: StreamId,
        sources: Vec<PeerId>,
    },
    ExportFailed {
        stream_id: StreamId,
        reason: String,
    },
    ExportExited {
        stream_id: StreamId,
        code: Option<i32>,
    },
}

/// Request handler shared by every signaling connection
pub struct CallHandler {
    peers: Arc<PeerRegistry>,
    adapter: EngineAdapter,
    supervisor: Arc<TranscoderSupervisor>,
    events: broadcast::Sender<CallEvent>,
}

impl CallHandler {
    pub fn new(adapter: EngineAdapter, supervisor: Arc<TranscoderSupervisor>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            peers: Arc::new(PeerRegistry::new(adapter.clone())),
            adapter,
            supervisor,
            events,
        }
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    pub fn supervisor(&self) -> &Arc<TranscoderSupervisor> {
        &self.supervisor
    }

    /// Subscribe to call events
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    /// Register a new connection
    pub async fn connect(&self, id: PeerId, notifier: Notifier) {
        let mut table = self.peers.lock().await;
        table.upsert(id).set_notifier(notifier);
        tracing::info!(peer = %id, peers = table.len(), "Peer connected");
    }

    /// Tear down everything a connection owned
    ///
    /// Safe to call more than once.
    pub async fn disconnect(&self, id: PeerId) {
        if self.peers.remove(id).await {
            self.emit(CallEvent::PeerLeft { peer: id });
        }
        self.supervisor.source_lost(id).await;
    }

    /// Handle one request from `id`
    pub async fn handle(&self, id: PeerId, request: Request) -> Result<Reply, SignalingError> {
        let method = request.method();
        tracing::debug!(peer = %id, method, "Request");

        let result = match request {
            Request::GetCapabilities => Ok(Reply::Capabilities(self.adapter.rtp_capabilities())),
            Request::CreateTransport { role } => self
                .create_transport(id, role)
                .await
                .map(Reply::Transport),
            Request::ConnectTransport {
                role,
                dtls_parameters,
            } => self
                .connect_transport(id, role, dtls_parameters)
                .await
                .map(|()| Reply::Ack {}),
            Request::Produce {
                kind,
                rtp_parameters,
            } => self
                .produce(id, kind, rtp_parameters)
                .await
                .map(|producer_id| Reply::Produced { producer_id }),
            Request::Consume { rtp_capabilities } => self.consume(id, rtp_capabilities).await,
        };

        if let Err(ref e) = result {
            match e {
                SignalingError::Engine(_) => {
                    tracing::warn!(peer = %id, method, error = %e, "Request failed")
                }
                _ => tracing::debug!(peer = %id, method, code = e.code(), "Request rejected"),
            }
        }
        result
    }

    async fn connect_transport(
        &self,
        id: PeerId,
        role: TransportRole,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), SignalingError> {
        let transport = {
            let table = self.peers.lock().await;
            let peer = table.get(id).ok_or(SignalingError::PeerNotConnected)?;
            peer.transport(role)
                .cloned()
                .ok_or(SignalingError::TransportNotFound(role))?
        };

        self.adapter
            .connect_webrtc_transport(&transport, dtls_parameters)
            .await?;
        Ok(())
    }

    async fn create_transport(
        &self,
        id: PeerId,
        role: TransportRole,
    ) -> Result<TransportParameters, SignalingError> {
        if !self.peers.contains(id).await {
            return Err(SignalingError::PeerNotConnected);
        }

        let params = self.adapter.create_webrtc_transport().await?;

        let replaced = {
            let mut table = self.peers.lock().await;
            match table.get_mut(id) {
                Some(peer) => peer.set_transport(role, params.id.clone()),
                None => {
                    drop(table);
                    self.adapter.release_transport(&params.id).await;
                    return Err(SignalingError::PeerNotConnected);
                }
            }
        };

        if let Some(old) = replaced {
            tracing::debug!(peer = %id, %role, transport = %old, "Replacing transport");
            self.adapter.release_transport(&old).await;
        }

        tracing::debug!(peer = %id, %role, transport = %params.id, "Transport created");
        Ok(params)
    }

    async fn produce(
        &self,
        id: PeerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<ProducerId, SignalingError> {
        let transport = {
            let mut table = self.peers.lock().await;
            let transport = table
                .get(id)
                .ok_or(SignalingError::PeerNotConnected)?
                .transport(TransportRole::Ingress)
                .cloned()
                .ok_or(SignalingError::TransportNotFound(TransportRole::Ingress))?;

            table.admit(id)?;
            table
                .get_mut(id)
                .ok_or(SignalingError::PeerNotConnected)?
                .claim(kind)?;
            transport
        };

        let produced = self.adapter.produce(&transport, kind, rtp_parameters).await;

        let mut table = self.peers.lock().await;
        let producer = match produced {
            Ok(producer) => producer,
            Err(e) => {
                if let Some(peer) = table.get_mut(id) {
                    peer.abandon(kind);
                }
                return Err(e.into());
            }
        };

        let Some(peer) = table.get_mut(id) else {
            drop(table);
            self.adapter.release_producer(&producer).await;
            return Err(SignalingError::PeerNotConnected);
        };
        peer.fill(kind, producer.clone());

        let paired = table.detect_pairing(id).map(|sources| {
            let own = table.get(id).and_then(|p| p.notifier().cloned());
            let other = table
                .get(sources.pairing.counterpart)
                .and_then(|p| p.notifier().cloned());
            (sources, own, other)
        });
        let room = table.room_size();
        drop(table);

        tracing::info!(peer = %id, %kind, producer = %producer, room, "Producer created");

        if let Some((sources, own, other)) = paired {
            let counterpart = sources.pairing.counterpart;
            tracing::info!(peer = %id, counterpart = %counterpart, "Room paired");

            self.notify(id, counterpart, own);
            self.spawn_export(sources);
            self.notify(counterpart, id, other);
        }

        Ok(producer)
    }

    /// Queue `peer-joined` without waiting on a stalled writer
    fn notify(&self, peer: PeerId, counterpart: PeerId, notifier: Option<Notifier>) {
        let Some(notifier) = notifier else {
            tracing::debug!(peer = %peer, "Peer gone before peer-joined could be delivered");
            return;
        };

        match notifier.try_send(Outbound::push(PushEvent::PeerJoined)) {
            Ok(()) => self.emit(CallEvent::PeerJoined { peer, counterpart }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(peer = %peer, "Outbound queue full, dropped peer-joined");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(peer = %peer, "Peer gone before peer-joined could be delivered");
            }
        }
    }

    fn spawn_export(&self, paired: PairedSources) {
        let supervisor = Arc::clone(&self.supervisor);
        let peers = Arc::clone(&self.peers);
        let events = self.events.clone();

        tokio::spawn(async move {
            let stream_id = StreamId::generate();
            let sources: Vec<LegSource> = paired
                .videos
                .iter()
                .map(|(peer, producer)| LegSource::new(*peer, producer.clone()))
                .collect();
            let peer_ids: Vec<PeerId> = sources.iter().map(|s| s.peer).collect();

            let session = match supervisor
                .start(stream_id.clone(), Layout::SideBySideCombined, sources)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(stream = %stream_id, error = %e, "Failed to start export");
                    let _ = events.send(CallEvent::ExportFailed {
                        stream_id,
                        reason: e.to_string(),
                    });
                    return;
                }
            };

            let _ = events.send(CallEvent::ExportStarted {
                stream_id: stream_id.clone(),
                sources: peer_ids.clone(),
            });

            // A source may have left while the export was starting
            for peer in peer_ids {
                if !peers.contains(peer).await {
                    supervisor.source_lost(peer).await;
                }
            }

            let event = match session.wait_for_exit().await {
                ExportState::Failed { reason } => CallEvent::ExportFailed { stream_id, reason },
                ExportState::Exited { code } => CallEvent::ExportExited { stream_id, code },
                _ => return,
            };
            let _ = events.send(event);
        });
    }

    async fn consume(
        &self,
        id: PeerId,
        capabilities: RtpCapabilities,
    ) -> Result<Reply, SignalingError> {
        let (transport, audio, video) = {
            let table = self.peers.lock().await;
            let peer = table.get(id).ok_or(SignalingError::PeerNotConnected)?;
            if table.room_size() < ROOM_CAPACITY {
                return Err(SignalingError::PeerNotConnected);
            }
            let counterpart = table
                .counterpart(id)
                .map(|p| p.id)
                .ok_or(SignalingError::PeerNotConnected)?;
            let (audio, video) = table
                .ready_producers(counterpart)
                .ok_or(SignalingError::ProducerNotFound)?;
            let transport = peer
                .transport(TransportRole::Egress)
                .cloned()
                .ok_or(SignalingError::TransportNotFound(TransportRole::Egress))?;
            (transport, audio, video)
        };

        for producer in [&video, &audio] {
            if !self.adapter.can_consume(producer, &capabilities) {
                return Err(SignalingError::CannotConsume(producer.clone()));
            }
        }

        let video_consumer = self
            .adapter
            .consume_for_peer(&transport, &video, &capabilities)
            .await?;
        let audio_consumer = match self
            .adapter
            .consume_for_peer(&transport, &audio, &capabilities)
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                self.adapter.release_consumer(&video_consumer.id).await;
                return Err(e.into());
            }
        };

        let consumed = ConsumedMedia {
            audio: audio_consumer.id.clone(),
            video: video_consumer.id.clone(),
        };
        let replaced = {
            let mut table = self.peers.lock().await;
            match table.get_mut(id) {
                Some(peer) => peer.set_consumed(consumed),
                None => {
                    drop(table);
                    self.adapter.release_consumer(&consumed.video).await;
                    self.adapter.release_consumer(&consumed.audio).await;
                    return Err(SignalingError::PeerNotConnected);
                }
            }
        };

        if let Some(old) = replaced {
            self.adapter.release_consumer(&old.video).await;
            self.adapter.release_consumer(&old.audio).await;
        }

        tracing::info!(
            peer = %id,
            audio = %audio_consumer.id,
            video = %video_consumer.id,
            "Consumers created"
        );

        Ok(Reply::Consumed {
            audio: audio_consumer,
            video: video_consumer,
        })
    }

    fn emit(&self, event: CallEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engine::{default_media_codecs, DtlsFingerprint, MemoryEngine, RtcpFeedback, RtpCodecParameters};
    use crate::registry::StreamRegistry;
    use crate::transcoder::TranscoderConfig;

    struct Harness {
        root: tempfile::TempDir,
        engine: Arc<MemoryEngine>,
        handler: CallHandler,
    }

    fn harness() -> Harness {
        let root = tempfile::tempdir().unwrap();
        let config = TranscoderConfig::default()
            .program("/nonexistent/transcoder")
            .output_root(root.path())
            .disable_port_probe();
        harness_with(root, config, MemoryEngine::new())
    }

    fn harness_with(root: tempfile::TempDir, config: TranscoderConfig, engine: MemoryEngine) -> Harness {
        let engine = Arc::new(engine);
        let adapter = EngineAdapter::new(engine.clone(), config.loopback);
        let supervisor = Arc::new(TranscoderSupervisor::new(
            config,
            adapter.clone(),
            Arc::new(StreamRegistry::new()),
        ));

        Harness {
            root,
            engine,
            handler: CallHandler::new(adapter, supervisor),
        }
    }

    fn params(kind: MediaKind) -> RtpParameters {
        let codec = match kind {
            MediaKind::Audio => RtpCodecParameters {
                mime_type: "audio/opus".into(),
                payload_type: 111,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: Default::default(),
                rtcp_feedback: vec![],
            },
            MediaKind::Video => RtpCodecParameters {
                mime_type: "video/H264".into(),
                payload_type: 102,
                clock_rate: 90_000,
                channels: None,
                parameters: Default::default(),
                rtcp_feedback: vec![RtcpFeedback::new("nack", "pli")],
            },
        };
        RtpParameters {
            codecs: vec![codec],
            ..Default::default()
        }
    }

    async fn join(h: &Harness, n: u64) -> (PeerId, mpsc::Receiver<Outbound>) {
        let id = PeerId::new(n);
        let (tx, rx) = mpsc::channel(16);
        h.handler.connect(id, tx).await;
        for role in [TransportRole::Ingress, TransportRole::Egress] {
            h.handler
                .handle(id, Request::CreateTransport { role })
                .await
                .unwrap();
        }
        (id, rx)
    }

    async fn produce(h: &Harness, id: PeerId, kind: MediaKind) -> Result<Reply, SignalingError> {
        h.handler
            .handle(
                id,
                Request::Produce {
                    kind,
                    rtp_parameters: params(kind),
                },
            )
            .await
    }

    async fn produce_both(h: &Harness, id: PeerId) {
        produce(h, id, MediaKind::Audio).await.unwrap();
        produce(h, id, MediaKind::Video).await.unwrap();
    }

    fn router_caps() -> RtpCapabilities {
        RtpCapabilities {
            codecs: default_media_codecs(),
            header_extensions: vec![],
        }
    }

    fn pushes(rx: &mut mpsc::Receiver<Outbound>) -> usize {
        let mut count = 0;
        while let Ok(frame) = rx.try_recv() {
            if frame.is_push() {
                count += 1;
            }
        }
        count
    }

    #[tokio::test]
    async fn test_capabilities() {
        let h = harness();
        let reply = h
            .handler
            .handle(PeerId::new(1), Request::GetCapabilities)
            .await
            .unwrap();
        assert_eq!(reply, Reply::Capabilities(router_caps()));
    }

    #[tokio::test]
    async fn test_produce_requires_ingress() {
        let h = harness();
        let id = PeerId::new(1);
        let (tx, _rx) = mpsc::channel(4);
        h.handler.connect(id, tx).await;

        assert_eq!(
            produce(&h, id, MediaKind::Audio).await,
            Err(SignalingError::TransportNotFound(TransportRole::Ingress))
        );
        assert_eq!(h.handler.peers().lock().await.room_size(), 0);
    }

    #[tokio::test]
    async fn test_connect_transport() {
        let h = harness();
        let (id, _rx) = join(&h, 1).await;
        let dtls = DtlsParameters {
            role: Some("client".into()),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: "AB:CD".into(),
            }],
        };

        let reply = h
            .handler
            .handle(
                id,
                Request::ConnectTransport {
                    role: TransportRole::Ingress,
                    dtls_parameters: dtls.clone(),
                },
            )
            .await
            .unwrap();
        assert_eq!(reply, Reply::Ack {});

        let (tx, _rx2) = mpsc::channel(4);
        h.handler.connect(PeerId::new(2), tx).await;
        assert_eq!(
            h.handler
                .handle(
                    PeerId::new(2),
                    Request::ConnectTransport {
                        role: TransportRole::Egress,
                        dtls_parameters: dtls,
                    },
                )
                .await,
            Err(SignalingError::TransportNotFound(TransportRole::Egress))
        );
    }

    #[tokio::test]
    async fn test_recreate_transport_releases_old() {
        let h = harness();
        let (id, _rx) = join(&h, 1).await;
        assert_eq!(h.engine.transport_count(), 2);

        h.handler
            .handle(
                id,
                Request::CreateTransport {
                    role: TransportRole::Ingress,
                },
            )
            .await
            .unwrap();
        assert_eq!(h.engine.transport_count(), 2);
    }

    #[tokio::test]
    async fn test_already_produced() {
        let h = harness();
        let (id, _rx) = join(&h, 1).await;

        produce(&h, id, MediaKind::Video).await.unwrap();
        assert_eq!(
            produce(&h, id, MediaKind::Video).await,
            Err(SignalingError::AlreadyProduced(MediaKind::Video))
        );
        assert_eq!(h.engine.producer_count(), 1);
    }

    #[tokio::test]
    async fn test_third_peer_rejected_without_mutation() {
        let h = harness();
        let (a, _ra) = join(&h, 1).await;
        let (b, _rb) = join(&h, 2).await;
        let (c, _rc) = join(&h, 3).await;

        produce(&h, a, MediaKind::Audio).await.unwrap();
        produce(&h, b, MediaKind::Audio).await.unwrap();

        assert_eq!(
            produce(&h, c, MediaKind::Video).await,
            Err(SignalingError::RoomFull)
        );

        let table = h.handler.peers().lock().await;
        let peer = table.get(c).unwrap();
        assert!(!peer.holds_media());
        assert!(peer.transport(TransportRole::Ingress).is_some());
        assert_eq!(table.room_size(), 2);
        drop(table);
        assert_eq!(h.engine.producer_count(), 2);
    }

    #[tokio::test]
    async fn test_room_frees_up_after_disconnect() {
        let h = harness();
        let (a, _ra) = join(&h, 1).await;
        let (b, _rb) = join(&h, 2).await;
        let (c, _rc) = join(&h, 3).await;

        produce(&h, a, MediaKind::Audio).await.unwrap();
        produce(&h, b, MediaKind::Audio).await.unwrap();
        h.handler.disconnect(b).await;

        produce(&h, c, MediaKind::Audio).await.unwrap();
        assert_eq!(h.handler.peers().lock().await.room_size(), 2);
    }

    #[tokio::test]
    async fn test_pairing_notifies_each_peer_once() {
        let h = harness();
        let mut events = h.handler.subscribe();
        let (a, mut ra) = join(&h, 1).await;
        let (b, mut rb) = join(&h, 2).await;

        produce_both(&h, a).await;
        assert_eq!(pushes(&mut ra), 0);

        produce(&h, b, MediaKind::Audio).await.unwrap();
        assert_eq!(pushes(&mut ra) + pushes(&mut rb), 0);

        produce(&h, b, MediaKind::Video).await.unwrap();
        assert_eq!(pushes(&mut ra), 1);
        assert_eq!(pushes(&mut rb), 1);

        // The export fails to spawn here; pairing is still announced once
        let mut seen = Vec::new();
        while !seen.iter().any(|e| matches!(e, CallEvent::ExportFailed { .. })) {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        let joined: Vec<&CallEvent> = seen
            .iter()
            .filter(|e| matches!(e, CallEvent::PeerJoined { .. }))
            .collect();
        assert_eq!(
            joined,
            vec![
                &CallEvent::PeerJoined {
                    peer: b,
                    counterpart: a
                },
                &CallEvent::PeerJoined {
                    peer: a,
                    counterpart: b
                },
            ]
        );
        assert_eq!(pushes(&mut ra) + pushes(&mut rb), 0);
        assert_eq!(h.handler.supervisor().ports().claimed_count(), 0);
        assert!(std::fs::read_dir(h.root.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_consume_errors() {
        let h = harness();
        let (a, _ra) = join(&h, 1).await;
        let caps = router_caps();

        let consume = |id, caps: RtpCapabilities| {
            h.handler.handle(
                id,
                Request::Consume {
                    rtp_capabilities: caps,
                },
            )
        };

        produce_both(&h, a).await;
        assert_eq!(
            consume(a, caps.clone()).await,
            Err(SignalingError::PeerNotConnected)
        );

        let (b, _rb) = join(&h, 2).await;
        produce(&h, b, MediaKind::Audio).await.unwrap();
        assert_eq!(
            consume(a, caps.clone()).await,
            Err(SignalingError::ProducerNotFound)
        );

        produce(&h, b, MediaKind::Video).await.unwrap();
        let video_only = RtpCapabilities {
            codecs: default_media_codecs()
                .into_iter()
                .filter(|c| c.kind == MediaKind::Video)
                .collect(),
            header_extensions: vec![],
        };
        let (b_audio, _) = h.handler.peers().lock().await.ready_producers(b).unwrap();
        assert_eq!(
            consume(a, video_only).await,
            Err(SignalingError::CannotConsume(b_audio))
        );
        assert!(h.handler.peers().lock().await.get(a).unwrap().consumed().is_none());
    }

    #[tokio::test]
    async fn test_consume_replaces_previous_pair() {
        let h = harness();
        let (a, _ra) = join(&h, 1).await;
        let (b, _rb) = join(&h, 2).await;
        produce_both(&h, a).await;
        produce_both(&h, b).await;

        let request = || Request::Consume {
            rtp_capabilities: router_caps(),
        };

        let reply = h.handler.handle(a, request()).await.unwrap();
        let Reply::Consumed { audio, video } = reply else {
            panic!("unexpected reply");
        };
        assert_eq!(audio.kind, MediaKind::Audio);
        assert_eq!(video.kind, MediaKind::Video);
        let table = h.handler.peers().lock().await;
        let (b_audio, b_video) = table.ready_producers(b).unwrap();
        drop(table);
        assert_eq!(audio.producer_id, b_audio);
        assert_eq!(video.producer_id, b_video);

        h.handler.handle(a, request()).await.unwrap();
        assert_eq!(h.engine.is_paused(&audio.id), None);
        assert_eq!(h.engine.is_paused(&video.id), None);

        let table = h.handler.peers().lock().await;
        let current = table.get(a).unwrap().consumed().unwrap();
        assert_ne!(current.audio, audio.id);
        assert_eq!(h.engine.is_paused(&current.video), Some(false));
    }

    #[tokio::test]
    async fn test_disconnect_releases_everything() {
        let h = harness();
        let mut events = h.handler.subscribe();
        let (a, _ra) = join(&h, 1).await;
        produce_both(&h, a).await;

        h.handler.disconnect(a).await;
        h.handler.disconnect(a).await;

        assert!(h.engine.live_resources().is_empty());
        assert!(!h.handler.peers().contains(a).await);
        assert_eq!(events.recv().await.unwrap(), CallEvent::PeerLeft { peer: a });
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_produce_admits_two() {
        let root = tempfile::tempdir().unwrap();
        let config = TranscoderConfig::default()
            .program("/nonexistent/transcoder")
            .output_root(root.path())
            .disable_port_probe();
        let h = harness_with(
            root,
            config,
            MemoryEngine::new().with_latency(Duration::from_millis(20)),
        );

        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for n in 1..=4 {
            let (id, rx) = join(&h, n).await;
            ids.push(id);
            receivers.push(rx);
        }

        let results = futures_util::future::join_all(
            ids.iter().map(|id| produce(&h, *id, MediaKind::Audio)),
        )
        .await;

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| **r == Err(SignalingError::RoomFull))
            .count();
        assert_eq!(admitted, 2);
        assert_eq!(rejected, 2);
        assert_eq!(h.engine.producer_count(), 2);
        assert_eq!(h.handler.peers().lock().await.room_size(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pairing_publishes_combined_stream() {
        use std::os::unix::fs::PermissionsExt;

        use axum::body::Body;
        use axum::http::{Request as HttpRequest, StatusCode};
        use tower::ServiceExt;

        use crate::server::http;

        let root = tempfile::tempdir().unwrap();
        let program = root.path().join("transcoder.sh");
        std::fs::write(
            &program,
            "#!/bin/sh\nfor last; do :; done\necho '#EXTM3U' > \"$last\"\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = TranscoderConfig::default()
            .program(program)
            .output_root(root.path().join("hls"))
            .port_range(7300, 7399)
            .disable_port_probe()
            .readiness_timeout(Duration::from_millis(100))
            .warm_up(Duration::from_millis(100));
        let h = harness_with(root, config, MemoryEngine::new());

        let mut events = h.handler.subscribe();
        let (a, _ra) = join(&h, 1).await;
        let (b, _rb) = join(&h, 2).await;
        produce_both(&h, a).await;
        produce_both(&h, b).await;

        let mut started = Vec::new();
        while started.is_empty() {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                CallEvent::ExportStarted { stream_id, sources } => started.push((stream_id, sources)),
                CallEvent::ExportFailed { reason, .. } => panic!("export failed: {}", reason),
                _ => {}
            }
        }
        let (stream_id, mut sources) = started.remove(0);
        sources.sort();
        assert_eq!(sources, vec![a, b]);

        let streams = h.handler.supervisor().streams();
        let session = streams.get(&stream_id).await.unwrap();
        assert_eq!(session.layout(), Layout::SideBySideCombined);
        assert_eq!(session.sources().len(), 2);
        assert_eq!(h.engine.consumer_count(), 2);
        assert_eq!(streams.stream_count().await, 1);

        let state = tokio::time::timeout(Duration::from_secs(5), session.wait_until_started())
            .await
            .unwrap();
        assert_eq!(state, ExportState::Active);

        let response = http::router(Arc::clone(streams))
            .oneshot(
                HttpRequest::builder()
                    .uri(format!("/stream/{}/manifest", stream_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        session.stop();
        session.wait_for_exit().await;
        assert_eq!(h.handler.supervisor().ports().claimed_count(), 0);
        assert_eq!(h.engine.consumer_count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_pairing() {
        let h = harness();
        let mut events = h.handler.subscribe();
        let (a, _ra) = join(&h, 1).await;

        let b = PeerId::new(2);
        let (tx, mut rb) = mpsc::channel(1);
        tx.try_send(Outbound::push(PushEvent::PeerJoined)).unwrap();
        h.handler.connect(b, tx).await;
        for role in [TransportRole::Ingress, TransportRole::Egress] {
            h.handler
                .handle(b, Request::CreateTransport { role })
                .await
                .unwrap();
        }

        produce_both(&h, b).await;
        produce(&h, a, MediaKind::Audio).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), produce(&h, a, MediaKind::Video))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(pushes(&mut rb), 1);
        assert_eq!(
            events.recv().await.unwrap(),
            CallEvent::PeerJoined {
                peer: a,
                counterpart: b
            }
        );
    }
}
