use serde::Serialize;
use tokio::time::Instant;

use crate::health::assess;
use crate::manager::ConnectionManager;
use crate::session::SessionState;
use crate::transport::TransportKind;

/// Point-in-time snapshot of the session for logs and debug overlays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDiagnostics {
    pub endpoint: String,
    pub state: SessionState,
    pub connected: bool,
    pub healthy: bool,
    pub connection_id: Option<String>,
    pub transport: Option<TransportKind>,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub reconnects: u64,
    pub last_error: Option<String>,
    pub latency_ms: Option<u64>,
    /// Time since anything was heard from the server.
    pub idle_ms: Option<u64>,
    pub connected_for_ms: Option<u64>,
    pub pending_requests: usize,
}

impl ConnectionManager {
    pub fn diagnostics(&self) -> ConnectionDiagnostics {
        let now = Instant::now();
        let pending_requests = self.pending_requests();
        self.with_session(|session| {
            let since = |at: Instant| now.saturating_duration_since(at).as_millis() as u64;
            ConnectionDiagnostics {
                endpoint: self.config().endpoint.clone(),
                state: session.state(),
                connected: session.is_connected(),
                healthy: assess(session, self.config(), now).is_healthy(),
                connection_id: session.connection_id().map(str::to_string),
                transport: session.transport(),
                reconnect_attempts: session.attempts(),
                max_reconnect_attempts: session.max_attempts(),
                reconnects: session.reconnects(),
                last_error: session.last_error().map(str::to_string),
                latency_ms: session.latency().map(|d| d.as_millis() as u64),
                idle_ms: session.last_activity().map(since),
                connected_for_ms: session.connected_at().map(since),
                pending_requests,
            }
        })
    }
}
