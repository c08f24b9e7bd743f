//! Stream registry for the HLS read path
//!
//! Maps stream identifiers to their export sessions and output directories.
//! The supervisor registers a session before spawning the transcoder; the
//! file server resolves manifest and segment paths through the registry.
//!
//! ```text
//!                     Arc<StreamRegistry>
//!                ┌──────────────────────────┐
//!                │ streams: HashMap<Id,     │
//!                │   StreamEntry {          │
//!                │     session,             │
//!                │     exited_at,           │
//!                │   }                      │
//!                │ >                        │
//!                └────────────┬─────────────┘
//!                             │
//!        ┌────────────────────┼────────────────────┐
//!        │                    │                    │
//!        ▼                    ▼                    ▼
//!   [Supervisor]        [File server]       [Cleanup task]
//!   register()          live_streams()      cleanup()
//!                       segment_path()      remove dirs
//! ```
//!
//! Only `Active` sessions are advertised. Exited and failed entries linger
//! for `exited_linger` and are then removed, their directories handled per
//! the configured [`RetentionPolicy`].

pub mod config;
pub mod entry;
pub mod error;
pub mod store;

pub use config::{RegistryConfig, RetentionPolicy};
pub use entry::{StreamEntry, StreamId};
pub use error::RegistryError;
pub use store::StreamRegistry;
