//! Per-peer state
//!
//! Tracks what one signaling connection owns in the media engine: up to one
//! transport per role, one producer per media kind and the consumer pair
//! receiving the counterpart's media.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::{ConsumerId, MediaKind, ProducerId, TransportId};
use crate::error::SignalingError;
use crate::signaling::Notifier;

/// Connection identifier, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(u64);

impl PeerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Direction of a peer's WebRTC transport, seen from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    /// Browser sends media to the server
    Ingress,
    /// Server sends media to the browser
    Egress,
}

impl fmt::Display for TransportRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportRole::Ingress => f.write_str("ingress"),
            TransportRole::Egress => f.write_str("egress"),
        }
    }
}

/// Production state of one media kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MediaSlot {
    #[default]
    Empty,
    /// Admitted, engine call in flight
    Pending,
    Ready(ProducerId),
}

impl MediaSlot {
    pub fn is_empty(&self) -> bool {
        matches!(self, MediaSlot::Empty)
    }

    pub fn producer(&self) -> Option<&ProducerId> {
        match self {
            MediaSlot::Ready(id) => Some(id),
            _ => None,
        }
    }
}

/// Audio and video production slots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducedMedia {
    pub audio: MediaSlot,
    pub video: MediaSlot,
}

impl ProducedMedia {
    pub fn slot(&self, kind: MediaKind) -> &MediaSlot {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut MediaSlot {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

/// Consumers through which a peer receives its counterpart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMedia {
    pub audio: ConsumerId,
    pub video: ConsumerId,
}

/// Engine resources a peer owned, handed back on teardown
#[derive(Debug, Default)]
pub struct PeerResources {
    pub consumers: Vec<ConsumerId>,
    pub producers: Vec<ProducerId>,
    pub transports: Vec<TransportId>,
}

impl PeerResources {
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty() && self.producers.is_empty() && self.transports.is_empty()
    }
}

/// One connected client
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,

    /// When the signaling connection was accepted
    pub connected_at: Instant,

    ingress: Option<TransportId>,
    egress: Option<TransportId>,
    produced: ProducedMedia,
    consumed: Option<ConsumedMedia>,
    notifier: Option<Notifier>,
}

impl Peer {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            connected_at: Instant::now(),
            ingress: None,
            egress: None,
            produced: ProducedMedia::default(),
            consumed: None,
            notifier: None,
        }
    }

    pub fn transport(&self, role: TransportRole) -> Option<&TransportId> {
        match role {
            TransportRole::Ingress => self.ingress.as_ref(),
            TransportRole::Egress => self.egress.as_ref(),
        }
    }

    /// Install a transport, returning the one it replaces
    pub fn set_transport(&mut self, role: TransportRole, id: TransportId) -> Option<TransportId> {
        match role {
            TransportRole::Ingress => self.ingress.replace(id),
            TransportRole::Egress => self.egress.replace(id),
        }
    }

    pub fn produced(&self) -> &ProducedMedia {
        &self.produced
    }

    pub fn consumed(&self) -> Option<&ConsumedMedia> {
        self.consumed.as_ref()
    }

    /// Install a consumer pair, returning the pair it replaces
    pub fn set_consumed(&mut self, consumed: ConsumedMedia) -> Option<ConsumedMedia> {
        self.consumed.replace(consumed)
    }

    pub fn notifier(&self) -> Option<&Notifier> {
        self.notifier.as_ref()
    }

    pub fn set_notifier(&mut self, notifier: Notifier) {
        self.notifier = Some(notifier);
    }

    /// Whether any media slot is claimed (pending or produced)
    pub fn holds_media(&self) -> bool {
        !self.produced.audio.is_empty() || !self.produced.video.is_empty()
    }

    /// Both audio and video produced
    pub fn is_ready(&self) -> bool {
        self.produced.audio.producer().is_some() && self.produced.video.producer().is_some()
    }

    /// Reserve a media slot before the engine call
    ///
    /// A slot is only ever claimed once; re-production is rejected.
    pub fn claim(&mut self, kind: MediaKind) -> Result<(), SignalingError> {
        let slot = self.produced.slot_mut(kind);
        if !slot.is_empty() {
            return Err(SignalingError::AlreadyProduced(kind));
        }
        *slot = MediaSlot::Pending;
        Ok(())
    }

    /// Fill a claimed slot with the engine's producer
    pub fn fill(&mut self, kind: MediaKind, producer: ProducerId) {
        *self.produced.slot_mut(kind) = MediaSlot::Ready(producer);
    }

    /// Give back a claimed slot after a failed engine call
    pub fn abandon(&mut self, kind: MediaKind) {
        let slot = self.produced.slot_mut(kind);
        if *slot == MediaSlot::Pending {
            *slot = MediaSlot::Empty;
        }
    }

    /// Take every engine resource out of the peer, consumers first
    pub fn take_resources(&mut self) -> PeerResources {
        let mut resources = PeerResources::default();

        if let Some(consumed) = self.consumed.take() {
            resources.consumers.push(consumed.audio);
            resources.consumers.push(consumed.video);
        }
        for slot in [&mut self.produced.audio, &mut self.produced.video] {
            if let MediaSlot::Ready(id) = std::mem::take(slot) {
                resources.producers.push(id);
            }
        }
        resources.transports.extend(self.ingress.take());
        resources.transports.extend(self.egress.take());

        resources
    }
}
