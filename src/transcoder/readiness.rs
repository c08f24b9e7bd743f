//! Detecting when the transcoder listens on its RTP ports
//!
//! On Linux the kernel socket tables in `/proc/net/udp{,6}` list every bound
//! UDP socket. Elsewhere there is nothing to poll and the caller falls back
//! to a fixed warm-up.

use std::time::Duration;

use tokio::time::Instant;

const SOCKET_TABLES: &[&str] = &["/proc/net/udp", "/proc/net/udp6"];

/// Outcome of waiting for ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every port showed up bound
    Bound,
    /// The timeout elapsed first
    TimedOut,
    /// The socket table is not available on this host
    Unsupported,
}

/// Whether a socket table lists a socket bound locally to `port`
///
/// Rows look like `  12: 0100007F:0FA0 00000000:0000 07 ...`; the local
/// address is the second column with the port in hex after the colon.
pub fn table_has_port(table: &str, port: u16) -> bool {
    table.lines().skip(1).any(|line| {
        line.split_whitespace()
            .nth(1)
            .and_then(|local| local.rsplit_once(':'))
            .and_then(|(_, hex)| u16::from_str_radix(hex, 16).ok())
            == Some(port)
    })
}

async fn read_tables() -> Option<Vec<String>> {
    let mut tables = Vec::with_capacity(SOCKET_TABLES.len());

    for path in SOCKET_TABLES {
        if let Ok(table) = tokio::fs::read_to_string(path).await {
            tables.push(table);
        }
    }

    (!tables.is_empty()).then_some(tables)
}

/// Poll until every port is bound or `timeout` elapses
pub async fn wait_until_bound(ports: &[u16], timeout: Duration, poll: Duration) -> Readiness {
    let deadline = Instant::now() + timeout;

    loop {
        let Some(tables) = read_tables().await else {
            return Readiness::Unsupported;
        };

        let bound = ports
            .iter()
            .all(|&port| tables.iter().any(|table| table_has_port(table, port)));
        if bound {
            return Readiness::Bound;
        }

        if Instant::now() >= deadline {
            return Readiness::TimedOut;
        }
        tokio::time::sleep(poll).await;
    }
}
