//! # callcast
//!
//! Pairs two WebRTC peers into a call over a media engine and republishes the
//! call as an HLS stream.
//!
//! ```text
//!   browser A ──ws──┐                         ┌──► consumers to B
//!                   ├─► CallHandler ─► engine ┤
//!   browser B ──ws──┘        │                └──► consumers to A
//!                            │ pairing
//!                            ▼
//!                  TranscoderSupervisor ─► plain RTP legs ─► transcoder
//!                            │                                   │
//!                            ▼                                   ▼
//!                     StreamRegistry ◄──── HLS file server ◄── segments
//! ```
//!
//! The media engine itself sits behind the [`engine::MediaEngine`] trait.
//! [`engine::MemoryEngine`] is an in-process implementation for tests and
//! demos.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use callcast::engine::MemoryEngine;
//! use callcast::{CallServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> callcast::Result<()> {
//!     let server = CallServer::new(ServerConfig::default(), Arc::new(MemoryEngine::new()));
//!     server.run().await
//! }
//! ```

pub mod egress;
pub mod engine;
pub mod error;
pub mod peer;
pub mod registry;
pub mod server;
pub mod signaling;
pub mod transcoder;

pub use error::{Error, Result};
pub use registry::{StreamId, StreamRegistry};
pub use server::{CallServer, ServerConfig};
pub use signaling::{CallEvent, CallHandler};
pub use transcoder::{ExportSession, ExportState, TranscoderSupervisor};
