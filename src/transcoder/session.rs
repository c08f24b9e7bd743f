//! Export session handle
//!
//! ```text
//! Starting ──► Active ──► Exited { code }
//!     │
//!     └──────► Failed { reason }
//! ```
//!
//! Pause and resume apply to the egress consumers, never to the session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, Notify};

use crate::peer::PeerId;
use crate::registry::StreamId;

use super::config::{Layout, Strategy};

/// Name of the HLS playlist inside a stream directory
pub const MANIFEST_FILE: &str = "stream.m3u8";

/// Lifecycle state of an export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportState {
    /// Directory created, transcoder spawning or waiting for its ports
    Starting,
    /// Consumers resumed, segments being written
    Active,
    /// Transcoder exited; `None` when killed by a signal
    Exited { code: Option<i32> },
    /// Startup failed before the session became active
    Failed { reason: String },
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Exited { .. } | ExportState::Failed { .. })
    }

    /// Whether the session ended badly (startup failure or non-zero exit)
    pub fn is_failure(&self) -> bool {
        match self {
            ExportState::Failed { .. } => true,
            ExportState::Exited { code } => *code != Some(0),
            _ => false,
        }
    }
}

/// Cheap, cloneable handle to one running media-to-segments conversion
#[derive(Debug, Clone)]
pub struct ExportSession {
    stream_id: StreamId,
    output_dir: PathBuf,
    layout: Layout,
    strategy: Strategy,
    sources: Vec<PeerId>,
    state: watch::Receiver<ExportState>,
    stop: Arc<Notify>,
}

impl ExportSession {
    pub(crate) fn new(
        stream_id: StreamId,
        output_dir: PathBuf,
        layout: Layout,
        strategy: Strategy,
        sources: Vec<PeerId>,
        state: watch::Receiver<ExportState>,
    ) -> Self {
        Self {
            stream_id,
            output_dir,
            layout,
            strategy,
            sources,
            state,
            stop: Arc::new(Notify::new()),
        }
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// Directory the transcoder writes into
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(MANIFEST_FILE)
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Peers whose video feeds the export
    pub fn sources(&self) -> &[PeerId] {
        &self.sources
    }

    pub fn has_source(&self, peer: PeerId) -> bool {
        self.sources.contains(&peer)
    }

    /// Current state
    pub fn state(&self) -> ExportState {
        self.state.borrow().clone()
    }

    /// Active sessions are the ones advertised to viewers
    pub fn is_live(&self) -> bool {
        *self.state.borrow() == ExportState::Active
    }

    /// Ask the supervisor to kill the transcoder
    ///
    /// A stop requested before the session becomes active is honoured as
    /// soon as the supervisor checks for it.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub(crate) fn stop_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.stop)
    }

    /// Wait until the session leaves `Starting`
    pub async fn wait_until_started(&self) -> ExportState {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(|s| *s != ExportState::Starting).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    /// Wait for the session to reach a terminal state
    pub async fn wait_for_exit(&self) -> ExportState {
        let mut rx = self.state.clone();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (watch::Sender<ExportState>, ExportSession) {
        let (tx, rx) = watch::channel(ExportState::Starting);
        let session = ExportSession::new(
            StreamId::new("abc"),
            PathBuf::from("/tmp/hls/stream-abc"),
            Layout::SideBySideCombined,
            Strategy::Combined,
            vec![PeerId::new(1), PeerId::new(2)],
            rx,
        );
        (tx, session)
    }

    #[test]
    fn test_state_classification() {
        assert!(!ExportState::Starting.is_terminal());
        assert!(!ExportState::Active.is_failure());
        assert!(!ExportState::Exited { code: Some(0) }.is_failure());
        assert!(ExportState::Exited { code: Some(1) }.is_failure());
        assert!(ExportState::Exited { code: None }.is_failure());
        assert!(ExportState::Failed { reason: "x".into() }.is_terminal());
    }

    #[test]
    fn test_session_accessors() {
        let (_tx, session) = session();
        assert_eq!(
            session.manifest_path(),
            PathBuf::from("/tmp/hls/stream-abc/stream.m3u8")
        );
        assert!(session.has_source(PeerId::new(2)));
        assert!(!session.has_source(PeerId::new(3)));
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn test_state_transitions_observed() {
        let (tx, session) = session();

        tx.send(ExportState::Active).unwrap();
        assert_eq!(session.wait_until_started().await, ExportState::Active);
        assert!(session.is_live());

        tx.send(ExportState::Exited { code: Some(0) }).unwrap();
        assert_eq!(
            session.wait_for_exit().await,
            ExportState::Exited { code: Some(0) }
        );
        assert!(!session.is_live());
    }

    #[tokio::test]
    async fn test_wait_returns_when_supervisor_gone() {
        let (tx, session) = session();
        drop(tx);
        assert_eq!(session.wait_for_exit().await, ExportState::Starting);
    }
}
