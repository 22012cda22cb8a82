//! Engine.IO v4 / Socket.IO v5 text codec.
//!
//! Two layers:
//! - [`EnginePacket`]: the transport framing (`0` open, `2` ping, `4` message, ...).
//!   Long-polling bodies carry several packets separated by `\x1e`.
//! - [`SocketPacket`]: carried inside engine `message` packets (`40` connect,
//!   `42["event",{...}]` event, `44{...}` connect error, ...).
//!
//! Only the default namespace and text payloads are supported; the chess
//! server never sends binary attachments.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::messages::{ClientMessage, ServerMessage};

/// Engine.IO protocol revision spoken by this client.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Default mount path of a Socket.IO server.
pub const DEFAULT_PATH: &str = "/socket.io/";

/// Record separator between packets in a long-polling payload.
pub const PAYLOAD_SEPARATOR: char = '\x1e';

/// Maximum accepted frame size in bytes (the server's default buffer size).
pub const MAX_MESSAGE_SIZE: usize = 1_000_000;

/// Probe payload exchanged during a transport upgrade.
pub const UPGRADE_PROBE: &str = "probe";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    EmptyPacket,
    UnknownPacketType(char),
    PayloadTooLarge(usize),
    Malformed(String),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPacket => write!(f, "empty packet"),
            Self::UnknownPacketType(c) => write!(f, "unknown packet type: {c:?}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::Malformed(e) => write!(f, "malformed packet: {e}"),
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

// ================================================================
// Engine.IO
// ================================================================

/// Body of the engine `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl HandshakeInfo {
    pub fn can_upgrade_to_websocket(&self) -> bool {
        self.upgrades.iter().any(|u| u == "websocket")
    }

    /// Longest the server may stay silent before the link counts as dead.
    pub fn liveness_window_ms(&self) -> u64 {
        self.ping_interval + self.ping_timeout
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(HandshakeInfo),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(match self {
            Self::Open(info) => {
                let body = serde_json::to_string(info)
                    .map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
                format!("0{body}")
            },
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        })
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        if frame.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::PayloadTooLarge(frame.len()));
        }
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::EmptyPacket)?;
        let rest = chars.as_str();
        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|e| ProtocolError::DeserializeError(e.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_string())),
            '3' => Ok(Self::Pong(rest.to_string())),
            '4' => Ok(Self::Message(rest.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// Split a long-polling response body into packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>, ProtocolError> {
    if body.is_empty() {
        return Err(ProtocolError::EmptyPacket);
    }
    body.split(PAYLOAD_SEPARATOR)
        .map(EnginePacket::decode)
        .collect()
}

/// Join packets into a long-polling request body.
pub fn encode_payload(packets: &[EnginePacket]) -> Result<String, ProtocolError> {
    let encoded = packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(encoded.join(&PAYLOAD_SEPARATOR.to_string()))
}

// ================================================================
// Socket.IO
// ================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// `0`; from the server the body carries `{"sid": ...}`.
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        data: Option<Value>,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        data: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn event(name: impl Into<String>, data: Option<Value>) -> Self {
        Self::Event {
            name: name.into(),
            data,
            ack: None,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let to_json =
            |v: &Value| serde_json::to_string(v).map_err(|e| ProtocolError::SerializeError(e.to_string()));
        Ok(match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(body)) => format!("0{}", to_json(body)?),
            Self::Disconnect => "1".to_string(),
            Self::Event { name, data, ack } => {
                let mut args = vec![Value::String(name.clone())];
                if let Some(data) = data {
                    args.push(data.clone());
                }
                let ack = ack.map(|id| id.to_string()).unwrap_or_default();
                format!("2{ack}{}", to_json(&Value::Array(args))?)
            },
            Self::Ack { id, data } => format!("3{id}{}", to_json(&Value::Array(data.clone()))?),
            Self::ConnectError(body) => format!("4{}", to_json(body)?),
        })
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::EmptyPacket)?;
        let mut rest = chars.as_str();

        // Namespaced packets look like `2/chess,["event"]`; only `/` is served.
        if rest.starts_with('/') {
            let (nsp, tail) = match rest.find(',') {
                Some(idx) => (&rest[..idx], &rest[idx + 1..]),
                None => (rest, ""),
            };
            if nsp != "/" {
                return Err(ProtocolError::Malformed(format!(
                    "unsupported namespace {nsp}"
                )));
            }
            rest = tail;
        }

        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let ack = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
            Some(id)
        } else {
            None
        };
        let body = &rest[digits..];
        let json = || -> Result<Value, ProtocolError> {
            serde_json::from_str(body).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
        };

        match kind {
            '0' if body.is_empty() => Ok(Self::Connect(None)),
            '0' => Ok(Self::Connect(Some(json()?))),
            '1' => Ok(Self::Disconnect),
            '2' => {
                let Value::Array(mut args) = json()? else {
                    return Err(ProtocolError::Malformed("event body is not an array".into()));
                };
                if args.is_empty() {
                    return Err(ProtocolError::Malformed("event without a name".into()));
                }
                let Value::String(name) = args.remove(0) else {
                    return Err(ProtocolError::Malformed("event name is not a string".into()));
                };
                let data = if args.is_empty() {
                    None
                } else {
                    Some(args.swap_remove(0))
                };
                Ok(Self::Event { name, data, ack })
            },
            '3' => {
                let id = ack.ok_or_else(|| ProtocolError::Malformed("ack without id".into()))?;
                let Value::Array(data) = json()? else {
                    return Err(ProtocolError::Malformed("ack body is not an array".into()));
                };
                Ok(Self::Ack { id, data })
            },
            '4' => Ok(Self::ConnectError(json()?)),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }

    /// Wrap in an engine `message` packet and encode for the wire.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        EnginePacket::Message(self.encode()?).encode()
    }
}

/// Socket.IO `sid` from a namespace connect acknowledgement.
pub fn connect_sid(body: Option<&Value>) -> Option<String> {
    body?.get("sid")?.as_str().map(str::to_string)
}

/// Human-readable message from a `connect_error` body.
pub fn connect_error_message(body: &Value) -> String {
    body.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

// ================================================================
// Typed messages <-> events
// ================================================================

fn split_tagged(value: Value) -> Result<(String, Option<Value>), ProtocolError> {
    let Value::Object(mut map) = value else {
        return Err(ProtocolError::SerializeError(
            "message did not serialize to an object".into(),
        ));
    };
    let name = match map.remove("event") {
        Some(Value::String(name)) => name,
        _ => return Err(ProtocolError::SerializeError("missing event tag".into())),
    };
    Ok((name, map.remove("data")))
}

/// Rebuild the adjacently-tagged form serde expects. Absent payloads
/// become `{}` and bare strings become `{"message": ...}` so terse
/// servers still decode.
fn join_tagged(name: &str, data: Option<Value>) -> Value {
    let data = match data {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(Value::String(s)) => serde_json::json!({ "message": s }),
        Some(other) => other,
    };
    serde_json::json!({ "event": name, "data": data })
}

/// Encode a `ClientMessage` as a Socket.IO event packet.
pub fn encode_client_message(msg: &ClientMessage) -> Result<SocketPacket, ProtocolError> {
    let value =
        serde_json::to_value(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let (name, data) = split_tagged(value)?;
    Ok(SocketPacket::event(name, data))
}

/// Encode a `ServerMessage` as a Socket.IO event packet.
pub fn encode_server_message(msg: &ServerMessage) -> Result<SocketPacket, ProtocolError> {
    let value =
        serde_json::to_value(msg).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let (name, data) = split_tagged(value)?;
    Ok(SocketPacket::event(name, data))
}

/// Decode an inbound event into its typed form.
pub fn decode_server_message(name: &str, data: Option<Value>) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_value(join_tagged(name, data))
        .map_err(|e| ProtocolError::DeserializeError(format!("{name}: {e}")))
}

/// Decode an outbound event (used by test servers and the relay tooling).
/// `resign` is accepted as an alias of `resign_game`.
pub fn decode_client_message(name: &str, data: Option<Value>) -> Result<ClientMessage, ProtocolError> {
    let name = if name == "resign" { "resign_game" } else { name };
    let value = if name == "leave_matchmaking" {
        serde_json::json!({ "event": name })
    } else {
        join_tagged(name, data)
    };
    serde_json::from_value(value).map_err(|e| ProtocolError::DeserializeError(format!("{name}: {e}")))
}
