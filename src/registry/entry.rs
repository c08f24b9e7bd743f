//! Stream identifiers and entries

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transcoder::{ExportSession, ExportState};

/// Opaque, externally addressable stream identifier
///
/// Used verbatim in URLs and directory names, so generated identifiers
/// contain only lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the stream's directory under the output root
    pub fn directory_name(&self) -> String {
        format!("stream-{}", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry for a single stream in the registry
#[derive(Debug)]
pub struct StreamEntry {
    pub session: ExportSession,

    /// When the stream was registered
    pub registered_at: Instant,

    /// When the registry first saw the session terminal
    pub exited_at: Option<Instant>,
}

impl StreamEntry {
    pub(super) fn new(session: ExportSession) -> Self {
        Self {
            session,
            registered_at: Instant::now(),
            exited_at: None,
        }
    }

    pub fn state(&self) -> ExportState {
        self.session.state()
    }

    /// Stamp the exit time once the session is terminal
    pub(super) fn observe_exit(&mut self, now: Instant) -> bool {
        if self.exited_at.is_none() && self.session.state().is_terminal() {
            self.exited_at = Some(now);
        }
        self.exited_at.is_some()
    }
}
