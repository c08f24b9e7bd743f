//! Peer registry
//!
//! The registry is the sole owner of [`Peer`] entries. Other components
//! refer to peers by [`PeerId`] and borrow entries through a [`PeerTable`]
//! guard for the duration of one validated critical section.
//!
//! The room is not stored separately: it is the set of peers holding
//! produced media, ordered by connection id.

use std::collections::BTreeMap;

use tokio::sync::{Mutex, MutexGuard};

use crate::engine::{EngineAdapter, MediaKind, ProducerId};
use crate::error::SignalingError;

use super::state::{Peer, PeerId, PeerResources};

/// Peers that may hold produced media at the same time
pub const ROOM_CAPACITY: usize = 2;

/// Two peers whose pairing has been announced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pairing {
    /// Peer whose production completed the pair
    pub completed_by: PeerId,
    /// The other member
    pub counterpart: PeerId,
}

impl Pairing {
    pub fn contains(&self, id: PeerId) -> bool {
        self.completed_by == id || self.counterpart == id
    }
}

/// Video sources of a newly completed pair, in announcement order
#[derive(Debug, Clone)]
pub struct PairedSources {
    pub pairing: Pairing,
    pub videos: [(PeerId, ProducerId); 2],
}

/// Peer entries plus the current pairing record
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<PeerId, Peer>,
    pairing: Option<Pairing>,
}

impl PeerTable {
    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Get the entry, creating it if absent
    pub fn upsert(&mut self, id: PeerId) -> &mut Peer {
        self.peers.entry(id).or_insert_with(|| Peer::new(id))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Peers holding produced media, in connection order
    pub fn room(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values().filter(|p| p.holds_media())
    }

    pub fn room_size(&self) -> usize {
        self.room().count()
    }

    /// Admission check for a peer about to produce
    ///
    /// A peer already in the room is always admitted; anyone else only while
    /// the room has capacity.
    pub fn admit(&self, id: PeerId) -> Result<(), SignalingError> {
        let holder = self.peers.get(&id).is_some_and(|p| p.holds_media());
        if !holder && self.room_size() >= ROOM_CAPACITY {
            return Err(SignalingError::RoomFull);
        }
        Ok(())
    }

    /// First room member other than `id`
    pub fn counterpart(&self, id: PeerId) -> Option<&Peer> {
        self.room().find(|p| p.id != id)
    }

    /// Audio and video producers of a ready peer
    pub fn ready_producers(&self, id: PeerId) -> Option<(ProducerId, ProducerId)> {
        let peer = self.peers.get(&id).filter(|p| p.is_ready())?;
        let produced = peer.produced();
        Some((
            produced.slot(MediaKind::Audio).producer()?.clone(),
            produced.slot(MediaKind::Video).producer()?.clone(),
        ))
    }

    pub fn pairing(&self) -> Option<Pairing> {
        self.pairing
    }

    /// Record a pairing if `id` just completed one
    ///
    /// Returns the pair's video sources exactly once per pairing event: only
    /// when exactly two peers are fully ready, `id` is one of them, and no
    /// pairing is currently recorded.
    pub fn detect_pairing(&mut self, id: PeerId) -> Option<PairedSources> {
        if self.pairing.is_some() {
            return None;
        }

        let ready: Vec<&Peer> = self.peers.values().filter(|p| p.is_ready()).collect();
        if ready.len() != ROOM_CAPACITY || !ready.iter().any(|p| p.id == id) {
            return None;
        }

        let counterpart = ready.iter().find(|p| p.id != id)?.id;
        let (_, own_video) = self.ready_producers(id)?;
        let (_, other_video) = self.ready_producers(counterpart)?;

        let pairing = Pairing {
            completed_by: id,
            counterpart,
        };
        self.pairing = Some(pairing);

        Some(PairedSources {
            pairing,
            videos: [(id, own_video), (counterpart, other_video)],
        })
    }

    /// Take an entry out, clearing any pairing it was part of
    fn take(&mut self, id: PeerId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        if self.pairing.is_some_and(|p| p.contains(id)) {
            self.pairing = None;
        }
        Some(peer)
    }
}

/// Owner of all peer entries
pub struct PeerRegistry {
    table: Mutex<PeerTable>,
    adapter: EngineAdapter,
}

impl PeerRegistry {
    pub fn new(adapter: EngineAdapter) -> Self {
        Self {
            table: Mutex::new(PeerTable::default()),
            adapter,
        }
    }

    /// Lock the table for one critical section
    ///
    /// Do not hold the guard across engine calls; re-lock and re-validate
    /// after them instead.
    pub async fn lock(&self) -> MutexGuard<'_, PeerTable> {
        self.table.lock().await
    }

    /// Whether the peer is registered
    pub async fn contains(&self, id: PeerId) -> bool {
        self.table.lock().await.get(id).is_some()
    }

    /// Register a peer (no-op if already present)
    pub async fn upsert(&self, id: PeerId) {
        self.table.lock().await.upsert(id);
    }

    /// Remove a peer and release everything it owned in the engine
    ///
    /// Idempotent: returns false if the peer was not registered.
    pub async fn remove(&self, id: PeerId) -> bool {
        let taken = self.table.lock().await.take(id);

        let Some(mut peer) = taken else {
            return false;
        };

        let resources = peer.take_resources();
        self.release(&resources).await;

        tracing::info!(
            peer = %id,
            consumers = resources.consumers.len(),
            producers = resources.producers.len(),
            transports = resources.transports.len(),
            "Peer removed"
        );
        true
    }

    /// Release engine resources: consumers, then producers, then transports
    pub async fn release(&self, resources: &PeerResources) {
        for consumer in &resources.consumers {
            self.adapter.release_consumer(consumer).await;
        }
        for producer in &resources.producers {
            self.adapter.release_producer(producer).await;
        }
        for transport in &resources.transports {
            self.adapter.release_transport(transport).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{
        EngineEvent, MediaEngine, MemoryEngine, Resource, RtpCodecParameters, RtpParameters,
    };
    use crate::peer::TransportRole;

    fn ready_table(ids: &[u64]) -> PeerTable {
        let mut table = PeerTable::default();
        for &n in ids {
            let peer = table.upsert(PeerId::new(n));
            for kind in [MediaKind::Audio, MediaKind::Video] {
                peer.claim(kind).unwrap();
                peer.fill(kind, ProducerId::new(format!("{}-{}", kind, n)));
            }
        }
        table
    }

    #[test]
    fn test_admission_capacity() {
        let mut table = ready_table(&[1, 2]);
        table.upsert(PeerId::new(3));

        assert_eq!(table.room_size(), 2);
        assert!(table.admit(PeerId::new(1)).is_ok());
        assert_eq!(table.admit(PeerId::new(3)), Err(SignalingError::RoomFull));
        // Unknown peers are held to the same rule
        assert_eq!(table.admit(PeerId::new(9)), Err(SignalingError::RoomFull));
    }

    #[test]
    fn test_pending_claim_counts_toward_capacity() {
        let mut table = ready_table(&[1]);
        table.upsert(PeerId::new(2)).claim(MediaKind::Audio).unwrap();
        table.upsert(PeerId::new(3));

        assert_eq!(table.admit(PeerId::new(3)), Err(SignalingError::RoomFull));
    }

    #[test]
    fn test_detect_pairing_once() {
        let mut table = ready_table(&[1, 2]);

        let sources = table.detect_pairing(PeerId::new(2)).unwrap();
        assert_eq!(sources.pairing.completed_by, PeerId::new(2));
        assert_eq!(sources.pairing.counterpart, PeerId::new(1));
        assert_eq!(sources.videos[0].1, ProducerId::new("video-2"));
        assert_eq!(sources.videos[1].1, ProducerId::new("video-1"));

        assert!(table.detect_pairing(PeerId::new(2)).is_none());
        assert!(table.detect_pairing(PeerId::new(1)).is_none());
    }

    #[test]
    fn test_no_pairing_until_both_ready() {
        let mut table = ready_table(&[1]);
        let peer = table.upsert(PeerId::new(2));
        peer.claim(MediaKind::Audio).unwrap();
        peer.fill(MediaKind::Audio, ProducerId::new("audio-2"));

        assert!(table.detect_pairing(PeerId::new(1)).is_none());
        assert!(table.detect_pairing(PeerId::new(2)).is_none());
        assert!(table.pairing().is_none());
    }

    #[test]
    fn test_counterpart() {
        let mut table = ready_table(&[4, 9]);
        table.upsert(PeerId::new(1));

        assert_eq!(table.counterpart(PeerId::new(4)).map(|p| p.id), Some(PeerId::new(9)));
        assert_eq!(table.counterpart(PeerId::new(1)).map(|p| p.id), Some(PeerId::new(4)));
    }

    #[tokio::test]
    async fn test_remove_releases_engine_resources() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = EngineAdapter::new(engine.clone(), "127.0.0.1".parse().unwrap());
        let registry = PeerRegistry::new(adapter);
        let id = PeerId::new(1);
        registry.upsert(id).await;

        let ingress = engine.create_webrtc_transport().await.unwrap().id;
        let egress = engine.create_webrtc_transport().await.unwrap().id;
        let params = RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".into(),
                payload_type: 96,
                clock_rate: 48_000,
                channels: Some(2),
                parameters: Default::default(),
                rtcp_feedback: vec![],
            }],
            ..Default::default()
        };
        let producer = engine
            .produce(&ingress, MediaKind::Audio, params)
            .await
            .unwrap();
        {
            let mut table = registry.lock().await;
            let peer = table.get_mut(id).unwrap();
            peer.set_transport(TransportRole::Ingress, ingress.clone());
            peer.set_transport(TransportRole::Egress, egress.clone());
            peer.claim(MediaKind::Audio).unwrap();
            peer.fill(MediaKind::Audio, producer.clone());
        }

        assert!(registry.remove(id).await);
        assert!(engine.live_resources().is_empty());

        let released: Vec<Resource> = engine
            .events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Released(r) => Some(r),
                _ => None,
            })
            .collect();
        assert_eq!(
            released,
            vec![
                Resource::Producer(producer),
                Resource::Transport(ingress),
                Resource::Transport(egress),
            ]
        );

        // Idempotent
        assert!(!registry.remove(id).await);
        assert!(!registry.contains(id).await);
    }
}
