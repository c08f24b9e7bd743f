//! Session descriptions for the transcoder
//!
//! The transcoder learns where and how to receive each egress leg from a
//! small SDP file:
//!
//! ```text
//! v=0
//! o=- 0 0 IN IP4 127.0.0.1
//! s=callcast
//! c=IN IP4 127.0.0.1
//! t=0 0
//! m=video 4000 RTP/AVP 97
//! a=rtpmap:97 H264/90000
//! a=fmtp:97 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f
//! a=rtcp-fb:97 nack
//! a=rtcp-fb:97 nack pli
//! a=rtcp-fb:97 ccm fir
//! a=rtcp-fb:97 goog-remb
//! a=sendonly
//! ```
//!
//! Payload type, clock rate and format parameters must match the RTP the
//! engine actually sends, or the transcoder silently fails to decode. Build
//! descriptions from the egress consumer's negotiated codec with
//! [`SessionDescription::from_codec`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use serde_json::Value;

use crate::engine::{MediaKind, RtcpFeedback, RtpCodecParameters};

/// Media direction attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendOnly,
    RecvOnly,
    SendRecv,
}

impl Direction {
    fn attribute(&self) -> &'static str {
        match self {
            Direction::SendOnly => "sendonly",
            Direction::RecvOnly => "recvonly",
            Direction::SendRecv => "sendrecv",
        }
    }
}

/// Loop-back media description for one RTP stream
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescription {
    pub kind: MediaKind,
    pub address: IpAddr,
    pub port: u16,
    pub payload_type: u8,
    pub codec_name: String,
    pub clock_rate: u32,
    pub channels: Option<u8>,
    /// `key=value` format parameters, in order
    pub format_parameters: Vec<(String, String)>,
    pub feedback: Vec<RtcpFeedback>,
    pub direction: Direction,
}

impl SessionDescription {
    /// Video description on the IPv4 loop-back with the full feedback set
    /// (nack, nack pli, ccm fir, goog-remb)
    pub fn new(port: u16, payload_type: u8, codec_name: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            kind: MediaKind::Video,
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            payload_type,
            codec_name: codec_name.into(),
            clock_rate,
            channels: None,
            format_parameters: Vec::new(),
            feedback: vec![
                RtcpFeedback::new("nack", ""),
                RtcpFeedback::new("nack", "pli"),
                RtcpFeedback::new("ccm", "fir"),
                RtcpFeedback::new("goog-remb", ""),
            ],
            direction: Direction::SendOnly,
        }
    }

    /// Description mirroring a negotiated codec
    pub fn from_codec(kind: MediaKind, codec: &RtpCodecParameters, address: IpAddr, port: u16) -> Self {
        let format_parameters = codec
            .parameters
            .iter()
            .map(|(key, value)| (key.clone(), format_value(value)))
            .collect();

        Self {
            kind,
            address,
            port,
            payload_type: codec.payload_type,
            codec_name: codec.codec_name().to_string(),
            clock_rate: codec.clock_rate,
            channels: codec.channels,
            format_parameters,
            feedback: codec.rtcp_feedback.clone(),
            direction: Direction::SendOnly,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Render the SDP text
    pub fn render(&self) -> String {
        self.to_string()
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = match self.address {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };
        let pt = self.payload_type;

        writeln!(f, "v=0")?;
        writeln!(f, "o=- 0 0 IN {} {}", net, self.address)?;
        writeln!(f, "s=callcast")?;
        writeln!(f, "c=IN {} {}", net, self.address)?;
        writeln!(f, "t=0 0")?;
        writeln!(f, "m={} {} RTP/AVP {}", self.kind, self.port, pt)?;

        match self.channels {
            Some(channels) if channels > 1 => writeln!(
                f,
                "a=rtpmap:{} {}/{}/{}",
                pt, self.codec_name, self.clock_rate, channels
            )?,
            _ => writeln!(f, "a=rtpmap:{} {}/{}", pt, self.codec_name, self.clock_rate)?,
        }

        if !self.format_parameters.is_empty() {
            let params: Vec<String> = self
                .format_parameters
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            writeln!(f, "a=fmtp:{} {}", pt, params.join(";"))?;
        }

        for feedback in &self.feedback {
            writeln!(f, "a=rtcp-fb:{} {}", pt, feedback)?;
        }

        writeln!(f, "a={}", self.direction.attribute())
    }
}
