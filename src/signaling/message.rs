//! Signaling wire format
//!
//! Every frame is a JSON object carrying `"v": 1`:
//!
//! ```text
//! request   {"v":1,"id":7,"method":"produce","params":{"kind":"video","rtpParameters":{..}}}
//! response  {"v":1,"id":7,"result":{"producerId":"..."}}
//! error     {"v":1,"id":7,"error":{"code":"room-full","message":"streaming room full"}}
//! push      {"v":1,"event":"peer-joined"}
//! ```
//!
//! Requests are parsed into a closed [`Request`] enum at the boundary;
//! anything else is answered with `bad-request` and goes no further.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::{
    ConsumerParameters, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportParameters,
};
use crate::error::{ProtocolError, SignalingError};
use crate::peer::TransportRole;

/// Wire format version
pub const PROTOCOL_VERSION: u32 = 1;

/// Outbound queue of one connection
pub type Notifier = mpsc::Sender<Outbound>;

/// Decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    GetCapabilities,
    CreateTransport {
        role: TransportRole,
    },
    ConnectTransport {
        role: TransportRole,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },
    Consume {
        rtp_capabilities: RtpCapabilities,
    },
}

impl Request {
    /// Method name on the wire
    pub fn method(&self) -> &'static str {
        match self {
            Request::GetCapabilities => "get-capabilities",
            Request::CreateTransport { .. } => "create-transport",
            Request::ConnectTransport { .. } => "connect-transport",
            Request::Produce { .. } => "produce",
            Request::Consume { .. } => "consume",
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    v: Option<u32>,
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransportParams {
    role: TransportRole,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectTransportParams {
    role: TransportRole,
    dtls_parameters: DtlsParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProduceParams {
    kind: MediaKind,
    rtp_parameters: RtpParameters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumeParams {
    rtp_capabilities: RtpCapabilities,
}

fn params<T: for<'de> Deserialize<'de>>(id: u64, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value)
        .map_err(|e| ProtocolError::new(Some(id), format!("invalid params: {}", e)))
}

/// Parse one text frame into its request id and request
pub fn parse_request(text: &str) -> Result<(u64, Request), ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)
        .map_err(|e| ProtocolError::new(None, format!("malformed frame: {}", e)))?;

    let id = envelope.id;
    match envelope.v {
        Some(PROTOCOL_VERSION) => {}
        Some(v) => return Err(ProtocolError::new(id, format!("unsupported version {}", v))),
        None => return Err(ProtocolError::new(id, "missing version")),
    }
    let id = id.ok_or_else(|| ProtocolError::new(None, "missing request id"))?;
    let method = envelope
        .method
        .ok_or_else(|| ProtocolError::new(Some(id), "missing method"))?;

    let request = match method.as_str() {
        "get-capabilities" => Request::GetCapabilities,
        "create-transport" => {
            let p: CreateTransportParams = params(id, envelope.params)?;
            Request::CreateTransport { role: p.role }
        }
        "connect-transport" => {
            let p: ConnectTransportParams = params(id, envelope.params)?;
            Request::ConnectTransport {
                role: p.role,
                dtls_parameters: p.dtls_parameters,
            }
        }
        "produce" => {
            let p: ProduceParams = params(id, envelope.params)?;
            Request::Produce {
                kind: p.kind,
                rtp_parameters: p.rtp_parameters,
            }
        }
        "consume" => {
            let p: ConsumeParams = params(id, envelope.params)?;
            Request::Consume {
                rtp_capabilities: p.rtp_capabilities,
            }
        }
        other => {
            return Err(ProtocolError::new(
                Some(id),
                format!("unknown method {:?}", other),
            ))
        }
    };

    Ok((id, request))
}

/// Successful result of a request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Capabilities(RtpCapabilities),
    Transport(TransportParameters),
    Produced {
        #[serde(rename = "producerId")]
        producer_id: ProducerId,
    },
    Consumed {
        audio: ConsumerParameters,
        video: ConsumerParameters,
    },
    /// Empty acknowledgement
    Ack {},
}

/// Server-initiated notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PushEvent {
    /// The room now holds two ready peers; the receiver may consume
    #[serde(rename = "peer-joined")]
    PeerJoined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Frame sent to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outbound {
    v: u32,
    #[serde(flatten)]
    body: OutboundBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
enum OutboundBody {
    Result { id: u64, result: Reply },
    Error { id: Option<u64>, error: ErrorBody },
    Event { event: PushEvent },
}

impl Outbound {
    pub fn reply(id: u64, result: Reply) -> Self {
        Self::wrap(OutboundBody::Result { id, result })
    }

    pub fn error(id: u64, error: &SignalingError) -> Self {
        Self::wrap(OutboundBody::Error {
            id: Some(id),
            error: ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            },
        })
    }

    pub fn protocol_error(error: &ProtocolError) -> Self {
        Self::wrap(OutboundBody::Error {
            id: error.id,
            error: ErrorBody {
                code: error.code().to_string(),
                message: error.reason.clone(),
            },
        })
    }

    pub fn push(event: PushEvent) -> Self {
        Self::wrap(OutboundBody::Event { event })
    }

    fn wrap(body: OutboundBody) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            body,
        }
    }

    /// Whether this is a push notification
    pub fn is_push(&self) -> bool {
        matches!(self.body, OutboundBody::Event { .. })
    }

    /// Serialize to a text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
