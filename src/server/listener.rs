//! Call server listener
//!
//! Runs the WebSocket signaling accept loop and the HLS file server side by
//! side, plus the stream registry cleanup task.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::engine::{EngineAdapter, MediaEngine};
use crate::error::Result;
use crate::peer::PeerId;
use crate::registry::StreamRegistry;
use crate::server::config::ServerConfig;
use crate::server::http;
use crate::signaling::{serve_connection, CallHandler};
use crate::transcoder::TranscoderSupervisor;

/// Call server
pub struct CallServer {
    config: ServerConfig,
    handler: Arc<CallHandler>,
    streams: Arc<StreamRegistry>,
    next_peer_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl CallServer {
    /// Create a new server on top of a media engine
    pub fn new(config: ServerConfig, engine: Arc<dyn MediaEngine>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let adapter = EngineAdapter::new(engine, config.transcoder.loopback);
        let streams = Arc::new(StreamRegistry::with_config(config.registry.clone()));
        let supervisor = Arc::new(TranscoderSupervisor::new(
            config.transcoder.clone(),
            adapter.clone(),
            Arc::clone(&streams),
        ));

        Self {
            handler: Arc::new(CallHandler::new(adapter, supervisor)),
            streams,
            next_peer_id: AtomicU64::new(1),
            connection_semaphore,
            config,
        }
    }

    /// Get a reference to the stream registry
    pub fn streams(&self) -> &Arc<StreamRegistry> {
        &self.streams
    }

    /// Get a reference to the call handler
    pub fn handler(&self) -> &Arc<CallHandler> {
        &self.handler
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let signaling = TcpListener::bind(self.config.signaling_addr).await?;
        let http = TcpListener::bind(self.config.http_addr).await?;
        self.serve(signaling, http, shutdown).await
    }

    /// Serve on already bound listeners
    pub async fn serve<F>(&self, signaling: TcpListener, http: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        tracing::info!(addr = %signaling.local_addr()?, "Signaling server listening");
        tracing::info!(addr = %http.local_addr()?, "HLS file server listening");

        // Spawn cleanup task for stream registry
        let cleanup_handle = self.streams.spawn_cleanup_task();

        let app = http::router(Arc::clone(&self.streams));

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&signaling) => result,
            result = axum::serve(http, app).into_future() => result.map_err(Into::into),
        };

        // Stop cleanup task on shutdown
        cleanup_handle.abort();

        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, remote_addr)) => {
                    self.handle_connection(socket, remote_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, remote_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(remote = %remote_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let peer = PeerId::new(self.next_peer_id.fetch_add(1, Ordering::Relaxed));

        tracing::debug!(peer = %peer, remote = %remote_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let handler = Arc::clone(&self.handler);
        let queue = self.config.outbound_queue;

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = serve_connection(socket, peer, handler, queue).await {
                tracing::debug!(peer = %peer, error = %e, "Connection error");
            }
        });
    }

    /// Get the signaling bind address
    pub fn signaling_addr(&self) -> SocketAddr {
        self.config.signaling_addr
    }

    /// Get the HTTP bind address
    pub fn http_addr(&self) -> SocketAddr {
        self.config.http_addr
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::client_async;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::engine::MemoryEngine;
    use crate::transcoder::TranscoderConfig;

    fn server(max_connections: usize) -> Arc<CallServer> {
        let config = ServerConfig::default()
            .max_connections(max_connections)
            .transcoder(TranscoderConfig::default().disable_port_probe());
        Arc::new(CallServer::new(config, Arc::new(MemoryEngine::new())))
    }

    async fn start(server: Arc<CallServer>) -> (SocketAddr, SocketAddr, tokio::task::JoinHandle<()>) {
        let signaling = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addrs = (signaling.local_addr().unwrap(), http.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let _ = server
                .serve(signaling, http, std::future::pending())
                .await;
        });
        (addrs.0, addrs.1, handle)
    }

    #[tokio::test]
    async fn test_signaling_and_http_served() {
        let server = server(0);
        let (signaling, http, handle) = start(Arc::clone(&server)).await;

        let socket = TcpStream::connect(signaling).await.unwrap();
        let (mut client, _) = client_async(format!("ws://{}/", signaling), socket)
            .await
            .unwrap();
        client
            .send(Message::Text(
                r#"{"v":1,"id":7,"method":"get-capabilities"}"#.into(),
            ))
            .await
            .unwrap();
        let reply = loop {
            if let Message::Text(text) = client.next().await.unwrap().unwrap() {
                break serde_json::from_str::<serde_json::Value>(&text).unwrap();
            }
        };
        assert_eq!(reply["id"], 7);
        assert_eq!(server.handler().peers().lock().await.len(), 1);

        let mut socket = TcpStream::connect(http).await.unwrap();
        socket
            .write_all(b"GET /streams HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        socket.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("[]"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_shutdown_returns() {
        let server = server(0);
        let signaling = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let result = server.serve(signaling, http, async {}).await;
        assert!(result.is_ok());
    }
}
