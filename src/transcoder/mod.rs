//! Transcoder supervision
//!
//! Turns one or two producers into an HLS stream on disk:
//!
//! ```text
//!  producer A ─► leg 0 ─► 127.0.0.1:4000 ─┐
//!                                         ├─► transcoder ─► stream-{id}/stream.m3u8
//!  producer B ─► leg 1 ─► 127.0.0.1:4002 ─┘                 stream-{id}/segment_NNN.ts
//! ```
//!
//! The [`TranscoderSupervisor`] owns the process and its legs; callers hold
//! an [`ExportSession`] handle to observe state or request a stop.

pub mod args;
pub mod config;
pub mod readiness;
pub mod session;
pub mod supervisor;

pub use config::{Layout, Strategy, TranscoderConfig};
pub use readiness::Readiness;
pub use session::{ExportSession, ExportState};
pub use supervisor::TranscoderSupervisor;
