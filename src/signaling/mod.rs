//! WebSocket signaling
//!
//! One WebSocket connection per peer. Text frames carry the JSON envelope
//! from [`message`]; requests are handled one at a time per connection by
//! the shared [`CallHandler`], while pushes and replies share one outbound
//! queue drained by a writer task.

pub mod connection;
pub mod handler;
pub mod message;

pub use connection::serve_connection;
pub use handler::{CallEvent, CallHandler};
pub use message::{
    parse_request, Notifier, Outbound, PushEvent, Reply, Request, PROTOCOL_VERSION,
};
