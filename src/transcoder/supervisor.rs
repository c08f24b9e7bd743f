//! Transcoder process supervision
//!
//! `start` opens one egress leg per source, writes their session
//! descriptions next to the output, spawns the transcoder and registers the
//! stream. A background task then drives the session:
//!
//! ```text
//! spawned ──► ports bound (or timeout / warm-up) ──► resume legs ──► Active
//!    │                                                                 │
//!    └─ exits first ──► Failed                     exit or stop ──► Exited
//! ```
//!
//! Legs are released and their ports freed whenever the process is gone.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Notify};

use crate::egress::{EgressLeg, LegSource, PortAllocator};
use crate::engine::EngineAdapter;
use crate::error::{EngineError, TranscoderError};
use crate::peer::PeerId;
use crate::registry::{StreamId, StreamRegistry};

use super::args::{build_args, leg_sdp_path};
use super::config::{Layout, Strategy, TranscoderConfig};
use super::readiness::{wait_until_bound, Readiness};
use super::session::{ExportSession, ExportState};

/// Starts and supervises transcoder processes
pub struct TranscoderSupervisor {
    config: TranscoderConfig,
    adapter: EngineAdapter,
    ports: PortAllocator,
    streams: Arc<StreamRegistry>,
}

impl TranscoderSupervisor {
    pub fn new(config: TranscoderConfig, adapter: EngineAdapter, streams: Arc<StreamRegistry>) -> Self {
        let ports = if config.probe_ports {
            PortAllocator::with_address(config.port_range, config.loopback)
        } else {
            PortAllocator::without_probe(config.port_range)
        };

        Self {
            config,
            adapter,
            ports,
            streams,
        }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    /// Start exporting `sources` under `stream_id`
    ///
    /// Returns once the process is spawned and the stream registered; the
    /// session becomes `Active` later. Nothing is left behind on error.
    pub async fn start(
        &self,
        stream_id: StreamId,
        layout: Layout,
        sources: Vec<LegSource>,
    ) -> Result<ExportSession, TranscoderError> {
        if sources.len() != layout.source_count() {
            return Err(TranscoderError::SourceCount {
                expected: layout.source_count(),
                actual: sources.len(),
            });
        }

        let output_dir = self.config.output_root.join(stream_id.directory_name());
        tokio::fs::create_dir_all(&output_dir).await?;

        let peers: Vec<PeerId> = sources.iter().map(|s| s.peer).collect();
        let mut legs = Vec::with_capacity(sources.len());
        for source in sources {
            match EgressLeg::open(&self.adapter, &self.ports, source).await {
                Ok(leg) => legs.push(leg),
                Err(e) => {
                    self.abort(legs, &output_dir).await;
                    return Err(e);
                }
            }
        }

        let (strategy, child) = match self.launch(&stream_id, layout, &legs, &output_dir).await {
            Ok(launched) => launched,
            Err(e) => {
                self.abort(legs, &output_dir).await;
                return Err(e);
            }
        };

        let (state_tx, state_rx) = watch::channel(ExportState::Starting);
        let session = ExportSession::new(
            stream_id.clone(),
            output_dir.clone(),
            layout,
            strategy,
            peers,
            state_rx,
        );

        if let Err(e) = self.streams.register(session.clone()).await {
            drop(child);
            self.abort(legs, &output_dir).await;
            return Err(e.into());
        }

        tracing::info!(
            stream = %stream_id,
            ?layout,
            ?strategy,
            ports = ?legs.iter().map(EgressLeg::port).collect::<Vec<_>>(),
            "Transcoder started"
        );

        let task = SupervisedExport {
            stream_id,
            child,
            legs,
            state: state_tx,
            stop: session.stop_signal(),
            adapter: self.adapter.clone(),
            streams: Arc::clone(&self.streams),
            config: self.config.clone(),
        };
        tokio::spawn(task.run());

        Ok(session)
    }

    /// Stop every export fed by `peer` after the grace period
    pub async fn source_lost(&self, peer: PeerId) {
        let grace = self.config.source_loss_grace;

        for session in self.streams.sessions_with_source(peer).await {
            tracing::info!(
                stream = %session.stream_id(),
                peer = %peer,
                grace_ms = grace.as_millis() as u64,
                "Source peer left, stopping export after grace period"
            );
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                session.stop();
            });
        }
    }

    async fn launch(
        &self,
        stream_id: &StreamId,
        layout: Layout,
        legs: &[EgressLeg],
        output_dir: &Path,
    ) -> Result<(Strategy, Child), TranscoderError> {
        let mut sdp_paths = Vec::with_capacity(legs.len());
        for (index, leg) in legs.iter().enumerate() {
            let path = leg_sdp_path(output_dir, index);
            tokio::fs::write(&path, leg.description.render()).await?;
            sdp_paths.push(path);
        }

        let codec = legs.first().map(EgressLeg::codec_name).unwrap_or_default();
        let strategy = Strategy::select(layout, codec, self.config.single_source_strategy);
        let args = build_args(&self.config, strategy, &sdp_paths, output_dir);

        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscoderError::Spawn {
                program: self.config.program.display().to_string(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_output(stream_id.clone(), stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_output(stream_id.clone(), stderr));
        }

        Ok((strategy, child))
    }

    async fn abort(&self, legs: Vec<EgressLeg>, output_dir: &Path) {
        for leg in legs {
            leg.release(&self.adapter).await;
        }
        if let Err(e) = tokio::fs::remove_dir_all(output_dir).await {
            tracing::debug!(dir = %output_dir.display(), error = %e, "Could not remove output directory");
        }
    }
}

async fn drain_output<R>(stream_id: StreamId, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(stream = %stream_id, "transcoder: {}", line);
    }
}

enum Startup {
    Ready,
    Exited(std::io::Result<ExitStatus>),
    Stopped,
}

/// Everything the background task owns for one export
struct SupervisedExport {
    stream_id: StreamId,
    child: Child,
    legs: Vec<EgressLeg>,
    state: watch::Sender<ExportState>,
    stop: Arc<Notify>,
    adapter: EngineAdapter,
    streams: Arc<StreamRegistry>,
    config: TranscoderConfig,
}

impl SupervisedExport {
    async fn run(mut self) {
        let final_state = match self.await_startup().await {
            Startup::Ready => match self.activate().await {
                Ok(()) => self.await_exit().await,
                Err(e) => {
                    tracing::error!(stream = %self.stream_id, error = %e, "Failed to resume egress legs");
                    self.kill().await;
                    ExportState::Failed {
                        reason: format!("failed to resume egress leg: {}", e),
                    }
                }
            },
            Startup::Exited(status) => {
                let reason = match status {
                    Ok(status) => format!("transcoder exited before binding its ports ({})", status),
                    Err(e) => format!("failed to wait for transcoder: {}", e),
                };
                tracing::error!(stream = %self.stream_id, reason = %reason, "Export failed");
                ExportState::Failed { reason }
            }
            Startup::Stopped => self.kill().await,
        };

        for leg in std::mem::take(&mut self.legs) {
            leg.release(&self.adapter).await;
        }
        self.state.send_replace(final_state);
        self.streams.mark_exited(&self.stream_id).await;
    }

    async fn await_startup(&mut self) -> Startup {
        let ports: Vec<u16> = self.legs.iter().map(EgressLeg::port).collect();

        let readiness = tokio::select! {
            status = self.child.wait() => return Startup::Exited(status),
            _ = self.stop.notified() => return Startup::Stopped,
            readiness = wait_until_bound(
                &ports,
                self.config.readiness_timeout,
                self.config.readiness_poll_interval,
            ) => readiness,
        };

        match readiness {
            Readiness::Bound => Startup::Ready,
            Readiness::TimedOut => {
                tracing::warn!(
                    stream = %self.stream_id,
                    ports = ?ports,
                    timeout_ms = self.config.readiness_timeout.as_millis() as u64,
                    "Transcoder ports not seen bound, resuming anyway"
                );
                Startup::Ready
            }
            Readiness::Unsupported => tokio::select! {
                status = self.child.wait() => Startup::Exited(status),
                _ = self.stop.notified() => Startup::Stopped,
                _ = tokio::time::sleep(self.config.warm_up) => Startup::Ready,
            },
        }
    }

    async fn activate(&self) -> Result<(), EngineError> {
        for leg in &self.legs {
            if let Err(e) = self.adapter.request_key_frame(&leg.consumer).await {
                tracing::debug!(stream = %self.stream_id, error = %e, "Key frame request failed");
            }
            self.adapter.resume(&leg.consumer).await?;
        }

        self.state.send_replace(ExportState::Active);
        tracing::info!(stream = %self.stream_id, "Export active");
        Ok(())
    }

    async fn await_exit(&mut self) -> ExportState {
        tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) if status.success() || status.code().is_none() => {
                    tracing::info!(stream = %self.stream_id, %status, "Transcoder exited");
                    ExportState::Exited { code: status.code() }
                }
                Ok(status) => {
                    tracing::error!(stream = %self.stream_id, %status, "Transcoder exited with error");
                    ExportState::Failed { reason: format!("transcoder exited with {}", status) }
                }
                Err(e) => {
                    tracing::error!(stream = %self.stream_id, error = %e, "Failed to wait for transcoder");
                    ExportState::Failed { reason: e.to_string() }
                }
            },
            _ = self.stop.notified() => self.kill().await,
        }
    }

    async fn kill(&mut self) -> ExportState {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(stream = %self.stream_id, error = %e, "Failed to kill transcoder");
        }
        let code = match self.child.try_wait() {
            Ok(Some(status)) => status.code(),
            _ => None,
        };
        tracing::info!(stream = %self.stream_id, "Export stopped");
        ExportState::Exited { code }
    }
}
