//! Loop-back egress toward the transcoder
//!
//! - [`PortAllocator`] hands out UDP ports for the transcoder to listen on
//! - [`SessionDescription`] tells the transcoder what arrives on each port
//! - [`EgressLeg`] ties a producer, a paused consumer, a plain transport and
//!   a port lease together

pub mod leg;
pub mod port;
pub mod sdp;

pub use leg::{EgressLeg, LegSource};
pub use port::{PortAllocator, PortLease, PortRange};
pub use sdp::{Direction, SessionDescription};
