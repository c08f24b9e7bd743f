//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::registry::RegistryConfig;
use crate::transcoder::TranscoderConfig;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket signaling endpoint binds to
    pub signaling_addr: SocketAddr,

    /// Address the HLS file server binds to
    pub http_addr: SocketAddr,

    /// Maximum concurrent signaling connections (0 = unlimited)
    pub max_connections: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Frames queued per connection before senders wait
    pub outbound_queue: usize,

    /// Transcoder supervisor options
    pub transcoder: TranscoderConfig,

    /// Stream registry options
    pub registry: RegistryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            signaling_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 0, // Unlimited
            tcp_nodelay: true,
            outbound_queue: 64,
            transcoder: TranscoderConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Set the signaling bind address
    pub fn signaling(mut self, addr: SocketAddr) -> Self {
        self.signaling_addr = addr;
        self
    }

    /// Set the HTTP bind address
    pub fn http(mut self, addr: SocketAddr) -> Self {
        self.http_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection outbound queue size
    pub fn outbound_queue(mut self, size: usize) -> Self {
        self.outbound_queue = size.max(1);
        self
    }

    /// Set the directory streams are written under
    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.transcoder.output_root = root.into();
        self
    }

    /// Replace the transcoder options
    pub fn transcoder(mut self, config: TranscoderConfig) -> Self {
        self.transcoder = config;
        self
    }

    /// Replace the registry options
    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::RetentionPolicy;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.signaling_addr.port(), 8000);
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.max_connections, 0);
        assert!(config.tcp_nodelay);
        assert_eq!(config.transcoder.output_root, PathBuf::from("./hls"));
        assert_eq!(config.registry.retention, RetentionPolicy::Remove);
    }

    #[test]
    fn test_builder_outbound_queue_floor() {
        let config = ServerConfig::default().outbound_queue(0);

        assert_eq!(config.outbound_queue, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let signaling: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let http: SocketAddr = "127.0.0.1:9080".parse().unwrap();
        let config = ServerConfig::default()
            .signaling(signaling)
            .http(http)
            .max_connections(10)
            .output_root("/var/lib/callcast")
            .registry(RegistryConfig::default().exited_linger(Duration::from_secs(30)));

        assert_eq!(config.signaling_addr, signaling);
        assert_eq!(config.http_addr, http);
        assert_eq!(config.max_connections, 10);
        assert_eq!(
            config.transcoder.output_root,
            PathBuf::from("/var/lib/callcast")
        );
        assert_eq!(config.registry.exited_linger, Duration::from_secs(30));
    }
}
