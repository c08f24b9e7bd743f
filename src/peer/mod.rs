//! Connected peers and the two-party room
//!
//! ```text
//!              PeerRegistry (sole owner)
//!         ┌──────────────────────────────────┐
//!         │ peers: BTreeMap<PeerId, Peer {   │
//!         │   ingress / egress transport,    │
//!         │   produced { audio, video },     │
//!         │   consumed { audio, video }?,    │
//!         │ }>                               │
//!         │ pairing: Option<Pairing>         │
//!         └──────────────────────────────────┘
//!               room = peers holding media (≤ 2)
//! ```

pub mod registry;
pub mod state;

pub use registry::{Pairing, PairedSources, PeerRegistry, PeerTable, ROOM_CAPACITY};
pub use state::{
    ConsumedMedia, MediaSlot, Peer, PeerId, PeerResources, ProducedMedia, TransportRole,
};
