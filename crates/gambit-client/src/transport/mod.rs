//! Links to the game server.
//!
//! A [`Connector`] performs the Engine.IO handshake and the Socket.IO
//! namespace connect, then hands back a [`Link`]: a pair of channels owned
//! by a background pump task. The session layer only ever sees decoded
//! events and never touches sockets.

pub mod polling;
pub mod websocket;

#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use gambit_core::net::protocol::{ENGINE_IO_VERSION, EnginePacket, SocketPacket};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Negotiated transport mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// HTTP long-polling; slower, passes most proxies.
    #[serde(rename = "polling")]
    Polling,
    #[serde(rename = "websocket")]
    WebSocket,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::WebSocket => "websocket",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "polling" => Some(Self::Polling),
            "websocket" => Some(Self::WebSocket),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a link reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Event { name: String, data: Option<Value> },
    /// The server pinged and was answered.
    Keepalive,
    Upgraded(TransportKind),
    /// Terminal; sent at most once per link.
    Closed { reason: String },
}

/// What the session writes downward.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Packet(SocketPacket),
    /// Leave the namespace and close the transport.
    Close,
}

/// An open, namespace-connected session with the server.
#[derive(Debug)]
pub struct Link {
    /// Socket.IO id assigned by the server.
    pub connection_id: String,
    pub kind: TransportKind,
    pub inbound: mpsc::UnboundedReceiver<LinkEvent>,
    pub outbound: mpsc::UnboundedSender<Outbound>,
}

/// Transport-side ends of a [`Link`]'s channels.
#[derive(Debug)]
pub struct LinkHandle {
    pub inbound: mpsc::UnboundedSender<LinkEvent>,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl Link {
    pub fn channel(connection_id: impl Into<String>, kind: TransportKind) -> (Link, LinkHandle) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            Link {
                connection_id: connection_id.into(),
                kind,
                inbound: in_rx,
                outbound: out_tx,
            },
            LinkHandle {
                inbound: in_tx,
                outbound: out_rx,
            },
        )
    }
}

/// Opens links. Implementations own all I/O; the returned future must not
/// borrow from `self` or `config`.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, config: &ClientConfig) -> BoxFuture<'static, Result<Link, ClientError>>;
}

/// Engine.IO v4 / Socket.IO v5 connector over polling and WebSocket.
#[derive(Debug, Clone, Default)]
pub struct SocketIoConnector {
    http: reqwest::Client,
}

impl SocketIoConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connector for SocketIoConnector {
    fn connect(&self, config: &ClientConfig) -> BoxFuture<'static, Result<Link, ClientError>> {
        let http = self.http.clone();
        let config = config.clone();
        Box::pin(async move {
            let mut last_error = ClientError::Config("no transports configured".into());
            for (i, kind) in config.transports.iter().enumerate() {
                let opened = match kind {
                    TransportKind::Polling => polling::open(http.clone(), &config).await,
                    TransportKind::WebSocket => websocket::open(&config).await,
                };
                match opened {
                    Ok(link) => return Ok(link),
                    Err(e) => {
                        if let Some(next) = config.transports.get(i + 1) {
                            tracing::warn!(transport = %kind, next = %next, error = %e, "Transport failed, trying next");
                        }
                        last_error = e;
                    },
                }
            }
            Err(last_error)
        })
    }
}

/// Engine.IO endpoint URL for `kind`, optionally bound to an existing session.
pub fn engine_url(config: &ClientConfig, kind: TransportKind, sid: Option<&str>) -> String {
    let origin = config.endpoint.trim_end_matches('/');
    let origin = match kind {
        TransportKind::WebSocket => {
            if let Some(rest) = origin.strip_prefix("https://") {
                format!("wss://{rest}")
            } else if let Some(rest) = origin.strip_prefix("http://") {
                format!("ws://{rest}")
            } else {
                origin.to_string()
            }
        },
        TransportKind::Polling => {
            if let Some(rest) = origin.strip_prefix("wss://") {
                format!("https://{rest}")
            } else if let Some(rest) = origin.strip_prefix("ws://") {
                format!("http://{rest}")
            } else {
                origin.to_string()
            }
        },
    };
    let mut url = format!(
        "{origin}{}?EIO={ENGINE_IO_VERSION}&transport={}",
        config.path,
        kind.as_str()
    );
    if let Some(sid) = sid {
        url.push_str("&sid=");
        url.push_str(sid);
    }
    url
}

/// Result of routing one engine packet on an established link.
#[derive(Debug, PartialEq)]
pub(crate) enum Flow {
    Continue,
    Reply(EnginePacket),
    Close(String),
}

/// Forward one engine packet to the session and say what the pump must do.
pub(crate) fn route_packet(packet: EnginePacket, inbound: &mpsc::UnboundedSender<LinkEvent>) -> Flow {
    match packet {
        EnginePacket::Ping(data) => {
            let _ = inbound.send(LinkEvent::Keepalive);
            Flow::Reply(EnginePacket::Pong(data))
        },
        EnginePacket::Message(body) => match SocketPacket::decode(&body) {
            Ok(SocketPacket::Event { name, data, .. }) => {
                tracing::trace!(event = %name, "Inbound event");
                let _ = inbound.send(LinkEvent::Event { name, data });
                Flow::Continue
            },
            Ok(SocketPacket::Disconnect) => Flow::Close("io server disconnect".into()),
            Ok(other) => {
                tracing::debug!(packet = ?other, "Ignoring socket packet");
                Flow::Continue
            },
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable socket packet");
                Flow::Continue
            },
        },
        EnginePacket::Close => Flow::Close("transport close".into()),
        EnginePacket::Pong(_) | EnginePacket::Noop | EnginePacket::Upgrade | EnginePacket::Open(_) => {
            Flow::Continue
        },
    }
}

/// Wrap a socket packet for the wire.
pub(crate) fn message_packet(packet: &SocketPacket) -> Result<EnginePacket, ClientError> {
    Ok(EnginePacket::Message(packet.encode()?))
}
