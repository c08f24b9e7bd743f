//! Transcoder configuration

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::egress::PortRange;

/// How sources are laid out in the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One source, passed through
    SinglePassthrough,
    /// Two sources scaled to the same tile and stacked horizontally
    SideBySideCombined,
}

impl Layout {
    /// Number of egress legs the layout consumes
    pub fn source_count(&self) -> usize {
        match self {
            Layout::SinglePassthrough => 1,
            Layout::SideBySideCombined => 2,
        }
    }
}

/// Encoding strategy, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Remux without re-encoding; source codec must fit MPEG-TS
    Copy,
    /// Re-encode with a fixed keyframe interval and no look-ahead
    LowLatency,
    /// Re-encode two inputs into one stacked frame
    Combined,
}

impl Strategy {
    /// Pick the strategy for a layout
    ///
    /// Combined layouts always re-encode. Single sources use `preferred`,
    /// except that `Copy` falls back to `LowLatency` when the codec cannot be
    /// carried in MPEG-TS segments as-is.
    pub fn select(layout: Layout, codec_name: &str, preferred: Strategy) -> Strategy {
        match layout {
            Layout::SideBySideCombined => Strategy::Combined,
            Layout::SinglePassthrough => match preferred {
                Strategy::Copy if is_segment_compatible(codec_name) => Strategy::Copy,
                _ => Strategy::LowLatency,
            },
        }
    }
}

fn is_segment_compatible(codec_name: &str) -> bool {
    codec_name.eq_ignore_ascii_case("H264") || codec_name.eq_ignore_ascii_case("H265")
}

/// Transcoder supervisor options
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    /// Transcoder executable
    pub program: PathBuf,

    /// Directory under which one `stream-{id}` directory is created per export
    pub output_root: PathBuf,

    /// Ports handed to the transcoder for RTP input
    pub port_range: PortRange,

    /// Whether to check with the OS that a port is free before leasing it
    pub probe_ports: bool,

    /// Address egress RTP is sent to
    pub loopback: IpAddr,

    /// Strategy for single-source exports (`Copy` or `LowLatency`)
    pub single_source_strategy: Strategy,

    /// Tile size of each source in combined layouts
    pub tile_width: u32,
    pub tile_height: u32,

    /// Delay applied to the second source in combined layouts
    pub leg_offset: Duration,

    /// HLS target segment duration in seconds
    pub segment_duration: u32,

    /// Segments kept in the playlist
    pub playlist_size: u32,

    /// Frames between forced keyframes when re-encoding
    pub keyframe_interval: u32,

    /// Upper bound on waiting for the transcoder to bind its ports
    pub readiness_timeout: Duration,

    /// Poll interval while waiting for the ports
    pub readiness_poll_interval: Duration,

    /// Fixed wait used where the socket table cannot be inspected
    pub warm_up: Duration,

    /// Time an export keeps running after one of its source peers leaves
    pub source_loss_grace: Duration,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            output_root: PathBuf::from("./hls"),
            port_range: PortRange::default(),
            probe_ports: true,
            loopback: IpAddr::V4(Ipv4Addr::LOCALHOST),
            single_source_strategy: Strategy::LowLatency,
            tile_width: 640,
            tile_height: 480,
            leg_offset: Duration::from_millis(500),
            segment_duration: 2,
            playlist_size: 2,
            keyframe_interval: 46,
            readiness_timeout: Duration::from_secs(3),
            readiness_poll_interval: Duration::from_millis(50),
            warm_up: Duration::from_secs(1),
            source_loss_grace: Duration::from_secs(5),
        }
    }
}

impl TranscoderConfig {
    /// Set the transcoder executable
    pub fn program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the output root directory
    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = root.into();
        self
    }

    /// Set the RTP port range
    pub fn port_range(mut self, low: u16, high: u16) -> Self {
        self.port_range = PortRange::new(low, high);
        self
    }

    /// Disable the OS port probe
    pub fn disable_port_probe(mut self) -> Self {
        self.probe_ports = false;
        self
    }

    /// Set the single-source strategy; `Combined` is treated as `LowLatency`
    pub fn single_source_strategy(mut self, strategy: Strategy) -> Self {
        self.single_source_strategy = strategy;
        self
    }

    /// Set the tile size for combined layouts
    pub fn tile_size(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Set the second source's offset in combined layouts
    pub fn leg_offset(mut self, offset: Duration) -> Self {
        self.leg_offset = offset;
        self
    }

    /// Set the readiness timeout
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Set the fallback warm-up delay
    pub fn warm_up(mut self, warm_up: Duration) -> Self {
        self.warm_up = warm_up;
        self
    }

    /// Set the grace period after a source peer leaves
    pub fn source_loss_grace(mut self, grace: Duration) -> Self {
        self.source_loss_grace = grace;
        self
    }
}
