//! Loop-back RTP port allocation
//!
//! Each egress leg needs a UDP port for the transcoder to listen on, plus the
//! port above it for RTCP. The allocator hands out even ports from a fixed
//! range and keeps them claimed until the [`PortLease`] is dropped.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TranscoderError;

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl PortRange {
    pub fn new(low: u16, high: u16) -> Self {
        Self { low, high }
    }

    /// Even ports whose RTCP companion is also in range
    fn candidates(&self) -> impl Iterator<Item = u16> {
        let high = self.high;
        self.low
            .checked_add(self.low % 2)
            .into_iter()
            .flat_map(move |start| (start..high).step_by(2))
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(4000, 4099)
    }
}

#[derive(Debug)]
struct Inner {
    range: PortRange,
    address: IpAddr,
    probe: bool,
    claimed: Mutex<BTreeSet<u16>>,
}

/// Thread-safe port allocator
#[derive(Debug, Clone)]
pub struct PortAllocator {
    inner: Arc<Inner>,
}

impl PortAllocator {
    /// Allocator over `range`, probing the OS on the IPv4 loop-back address
    pub fn new(range: PortRange) -> Self {
        Self::build(range, IpAddr::V4(Ipv4Addr::LOCALHOST), true)
    }

    pub fn with_address(range: PortRange, address: IpAddr) -> Self {
        Self::build(range, address, true)
    }

    /// Skip the OS bind probe and rely on the claim set alone
    pub fn without_probe(range: PortRange) -> Self {
        Self::build(range, IpAddr::V4(Ipv4Addr::LOCALHOST), false)
    }

    fn build(range: PortRange, address: IpAddr, probe: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                range,
                address,
                probe,
                claimed: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    pub fn range(&self) -> PortRange {
        self.inner.range
    }

    /// Claim the lowest free port pair in range
    ///
    /// A port is free when no live lease holds it and, with probing on, both
    /// it and its RTCP companion can currently be bound.
    pub fn allocate(&self) -> Result<PortLease, TranscoderError> {
        let mut claimed = self.inner.claimed.lock();

        let port = self
            .inner
            .range
            .candidates()
            .filter(|port| !claimed.contains(port))
            .find(|&port| !self.inner.probe || self.is_bindable(port))
            .ok_or(TranscoderError::NoPortAvailable {
                low: self.inner.range.low,
                high: self.inner.range.high,
            })?;

        claimed.insert(port);
        tracing::debug!(port = port, claimed = claimed.len(), "Port allocated");

        Ok(PortLease {
            port,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Number of ports currently leased
    pub fn claimed_count(&self) -> usize {
        self.inner.claimed.lock().len()
    }

    pub fn is_claimed(&self, port: u16) -> bool {
        self.inner.claimed.lock().contains(&port)
    }

    fn is_bindable(&self, port: u16) -> bool {
        let address = self.inner.address;
        // Both sockets are dropped before returning
        UdpSocket::bind((address, port)).is_ok() && UdpSocket::bind((address, port + 1)).is_ok()
    }
}

/// A claimed port, released on drop
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    inner: Arc<Inner>,
}

impl PortLease {
    /// RTP port (RTCP uses `port + 1`)
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.inner.claimed.lock().remove(&self.port);
        tracing::debug!(port = self.port, "Port released");
    }
}
