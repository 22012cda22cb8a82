use gambit_core::net::protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A facade method was called while the session was not connected.
    /// Nothing was sent.
    NotConnected,
    /// Handshake failure: network, DNS, server unavailable, or refused
    /// namespace connect.
    Connect(String),
    /// The link broke while writing.
    Transport(String),
    /// A correlated request saw no reply inside its window.
    Timeout,
    /// The server answered a correlated request negatively.
    Rejected(String),
    /// The session was torn down while a request was pending.
    Disconnected,
    Protocol(ProtocolError),
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::Connect(m) => write!(f, "connect error: {m}"),
            Self::Transport(m) => write!(f, "transport error: {m}"),
            Self::Timeout => write!(f, "timed out waiting for a reply"),
            Self::Rejected(m) => write!(f, "rejected by server: {m}"),
            Self::Disconnected => write!(f, "session closed before a reply arrived"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Config(m) => write!(f, "invalid configuration: {m}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}
