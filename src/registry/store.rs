//! Stream registry implementation

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::peer::PeerId;
use crate::transcoder::ExportSession;

use super::config::{RegistryConfig, RetentionPolicy};
use super::entry::{StreamEntry, StreamId};
use super::error::RegistryError;

/// Central registry for all export sessions
///
/// Thread-safe via `RwLock`. File server lookups take the read lock only.
pub struct StreamRegistry {
    /// Map of stream id to stream entry
    streams: RwLock<HashMap<StreamId, StreamEntry>>,

    /// Configuration
    config: RegistryConfig,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a session under its stream id
    pub async fn register(&self, session: ExportSession) -> Result<(), RegistryError> {
        let mut streams = self.streams.write().await;
        let id = session.stream_id().clone();

        if streams.contains_key(&id) {
            return Err(RegistryError::DuplicateStream(id));
        }

        tracing::info!(
            stream = %id,
            dir = %session.output_dir().display(),
            sources = session.sources().len(),
            "Stream registered"
        );
        streams.insert(id, StreamEntry::new(session));

        Ok(())
    }

    /// Session handle for a stream
    pub async fn get(&self, id: &StreamId) -> Option<ExportSession> {
        self.streams
            .read()
            .await
            .get(id)
            .map(|entry| entry.session.clone())
    }

    /// Identifiers of active streams, oldest first
    pub async fn live_streams(&self) -> Vec<StreamId> {
        let streams = self.streams.read().await;

        let mut live: Vec<(&StreamId, Instant)> = streams
            .iter()
            .filter(|(_, entry)| entry.session.is_live())
            .map(|(id, entry)| (id, entry.registered_at))
            .collect();
        live.sort_by_key(|(_, registered_at)| *registered_at);

        live.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Non-terminal sessions fed by a peer
    pub async fn sessions_with_source(&self, peer: PeerId) -> Vec<ExportSession> {
        self.streams
            .read()
            .await
            .values()
            .filter(|entry| entry.session.has_source(peer) && !entry.state().is_terminal())
            .map(|entry| entry.session.clone())
            .collect()
    }

    /// Manifest path of a registered stream
    pub async fn manifest_path(&self, id: &StreamId) -> Result<PathBuf, RegistryError> {
        let streams = self.streams.read().await;
        let entry = streams
            .get(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.clone()))?;

        Ok(entry.session.manifest_path())
    }

    /// Path of a file inside a stream directory
    ///
    /// Only plain file names are accepted; anything that could leave the
    /// directory is rejected.
    pub async fn file_path(&self, id: &StreamId, name: &str) -> Result<PathBuf, RegistryError> {
        if !is_plain_file_name(name) {
            return Err(RegistryError::InvalidSegmentName(name.to_string()));
        }

        let streams = self.streams.read().await;
        let entry = streams
            .get(id)
            .ok_or_else(|| RegistryError::StreamNotFound(id.clone()))?;

        Ok(entry.session.output_dir().join(name))
    }

    /// Record that a session reached a terminal state
    pub async fn mark_exited(&self, id: &StreamId) {
        let mut streams = self.streams.write().await;

        if let Some(entry) = streams.get_mut(id) {
            if entry.observe_exit(Instant::now()) {
                tracing::info!(stream = %id, state = ?entry.state(), "Stream exited");
            }
        }
    }

    /// Remove an entry now, applying the retention policy
    pub async fn remove(&self, id: &StreamId) -> bool {
        let removed = self.streams.write().await.remove(id);

        match removed {
            Some(entry) => {
                self.retire(id, entry.session.output_dir()).await;
                true
            }
            None => false,
        }
    }

    /// Get total number of streams
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Run cleanup task once
    ///
    /// Removes entries that have been terminal for longer than
    /// `exited_linger`. Directories are removed after the lock is dropped.
    pub async fn cleanup(&self) {
        let now = Instant::now();
        let linger = self.config.exited_linger;

        let removed: Vec<(StreamId, PathBuf)> = {
            let mut streams = self.streams.write().await;

            let expired: Vec<StreamId> = streams
                .iter_mut()
                .filter_map(|(id, entry)| {
                    entry.observe_exit(now);
                    match entry.exited_at {
                        Some(exited_at) if now.duration_since(exited_at) >= linger => {
                            Some(id.clone())
                        }
                        _ => None,
                    }
                })
                .collect();

            expired
                .into_iter()
                .filter_map(|id| {
                    streams
                        .remove(&id)
                        .map(|entry| (id, entry.session.output_dir().to_path_buf()))
                })
                .collect()
        };

        for (id, dir) in removed {
            tracing::info!(stream = %id, "Stream removed by cleanup");
            self.retire(&id, &dir).await;
        }
    }

    async fn retire(&self, id: &StreamId, dir: &Path) {
        if self.config.retention == RetentionPolicy::Keep {
            return;
        }

        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => tracing::debug!(stream = %id, dir = %dir.display(), "Stream directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                stream = %id,
                dir = %dir.display(),
                error = %e,
                "Failed to remove stream directory"
            ),
        }
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        let interval = registry.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}
