//! Network surfaces: WebSocket signaling and the HLS file server

pub mod config;
pub mod http;
pub mod listener;

pub use config::ServerConfig;
pub use listener::CallServer;
