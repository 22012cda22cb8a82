use std::time::Duration;

use serde_json::Value;

use gambit_core::net::messages::ServerMessage;

/// Names of the events the manager itself raises.
pub mod names {
    pub const CONNECTION_STATUS: &str = "connection_status";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
    pub const RECONNECTED: &str = "reconnected";
    pub const RECONNECT_FAILED: &str = "reconnect_failed";
}

/// `connection_status` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub reason: Option<String>,
}

/// Everything delivered through the [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionStatus(ConnectionStatus),
    ConnectionError { error: String },
    ReconnectAttempt { attempt: u32, delay: Duration },
    /// A link opened after `attempts` automatic retries.
    Reconnected { attempts: u32 },
    /// The retry ceiling was reached; nothing more happens until
    /// `force_reconnect`.
    ReconnectFailed { attempts: u32 },
    Server(ServerMessage),
    /// An inbound event with no typed counterpart, or whose payload did
    /// not match the expected shape. Delivered under its own name.
    Unrecognized { name: String, data: Option<Value> },
}

impl ClientEvent {
    pub fn connected() -> Self {
        Self::ConnectionStatus(ConnectionStatus {
            connected: true,
            reason: None,
        })
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::ConnectionStatus(ConnectionStatus {
            connected: false,
            reason: Some(reason.into()),
        })
    }

    /// Name subscribers register under.
    pub fn name(&self) -> &str {
        match self {
            Self::ConnectionStatus(_) => names::CONNECTION_STATUS,
            Self::ConnectionError { .. } => names::CONNECTION_ERROR,
            Self::ReconnectAttempt { .. } => names::RECONNECT_ATTEMPT,
            Self::Reconnected { .. } => names::RECONNECTED,
            Self::ReconnectFailed { .. } => names::RECONNECT_FAILED,
            Self::Server(msg) => msg.event_name(),
            Self::Unrecognized { name, .. } => name,
        }
    }

    pub fn as_server(&self) -> Option<&ServerMessage> {
        match self {
            Self::Server(msg) => Some(msg),
            _ => None,
        }
    }
}
