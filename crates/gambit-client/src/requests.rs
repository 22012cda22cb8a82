//! Outstanding request/reply exchanges.
//!
//! A request is tagged with a `requestId`. A reply that echoes the id
//! resolves exactly that request; a reply without one resolves the oldest
//! pending request waiting on that event (and game, when both carry one).

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;

use gambit_core::net::messages::ServerMessage;

use crate::error::ClientError;

/// Reply events that settle a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub success: &'static str,
    pub rejection: &'static str,
}

impl Expectation {
    pub const AUTHENTICATE: Self = Self {
        success: "authenticated",
        rejection: "authentication_error",
    };
    pub const JOIN_GAME: Self = Self {
        success: "game_started",
        rejection: "game_not_found",
    };
}

type Reply = Result<ServerMessage, ClientError>;

struct Pending {
    id: String,
    expect: Expectation,
    game_id: Option<String>,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<Vec<Pending>>,
}

fn reply_game_id(msg: &ServerMessage) -> Option<&str> {
    match msg {
        ServerMessage::GameStarted(info) | ServerMessage::GameFound(info) => Some(&info.game_id),
        ServerMessage::GameNotFound(err) | ServerMessage::Error(err) | ServerMessage::AuthenticationError(err) => {
            err.game_id.as_deref()
        },
        _ => None,
    }
}

fn rejection_reason(msg: &ServerMessage) -> String {
    match msg {
        ServerMessage::GameNotFound(err) | ServerMessage::Error(err) | ServerMessage::AuthenticationError(err) => {
            err.reason()
        },
        other => other.event_name().to_string(),
    }
}

/// Index of the request a `name` reply settles.
fn find(entries: &[Pending], name: &str, request_id: Option<&str>, game: Option<&str>) -> Option<usize> {
    match request_id {
        Some(rid) => entries.iter().position(|p| {
            p.id == rid && (name == p.expect.success || name == p.expect.rejection || name == "error")
        }),
        None => entries.iter().position(|p| {
            (name == p.expect.success || name == p.expect.rejection)
                && match (&p.game_id, game) {
                    (Some(want), Some(got)) => want == got,
                    _ => true,
                }
        }),
    }
}

impl PendingRequests {
    fn lock(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        id: String,
        expect: Expectation,
        game_id: Option<String>,
    ) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.lock().push(Pending {
            id,
            expect,
            game_id,
            tx,
        });
        rx
    }

    /// Settle the request `msg` answers, if any. Returns true on a match.
    pub fn resolve(&self, msg: &ServerMessage) -> bool {
        let name = msg.event_name();
        let mut entries = self.lock();
        let Some(index) = find(&entries, name, msg.request_id(), reply_game_id(msg)) else {
            return false;
        };
        let pending = entries.remove(index);
        drop(entries);

        let reply = if name == pending.expect.success {
            Ok(msg.clone())
        } else {
            Err(ClientError::Rejected(rejection_reason(msg)))
        };
        tracing::debug!(request_id = %pending.id, event = name, "Request settled");
        let _ = pending.tx.send(reply);
        true
    }

    /// Settle the request answered by a reply whose payload did not decode.
    /// The reply arrived but cannot be handed back typed, so the request
    /// is rejected rather than left to time out.
    pub fn resolve_malformed(&self, name: &str, data: Option<&Value>) -> bool {
        let field = |key: &str| data.and_then(|d| d.get(key)).and_then(Value::as_str);
        let mut entries = self.lock();
        let Some(index) = find(&entries, name, field("requestId"), field("gameId")) else {
            return false;
        };
        let pending = entries.remove(index);
        drop(entries);

        let reason = match field("message") {
            Some(message) if name != pending.expect.success => message.to_string(),
            _ => format!("malformed {name} reply"),
        };
        tracing::warn!(request_id = %pending.id, event = name, "Request settled by undecodable reply");
        let _ = pending.tx.send(Err(ClientError::Rejected(reason)));
        true
    }

    pub fn cancel(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|p| p.id != id);
        entries.len() != before
    }

    /// Settle everything with `error`; used when the link is torn down.
    pub fn fail_all(&self, error: &ClientError) -> usize {
        let drained: Vec<Pending> = self.lock().drain(..).collect();
        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Deregisters its request when dropped, so an abandoned or timed-out
/// caller never leaves an entry behind.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: String,
}

impl<'a> PendingGuard<'a> {
    pub fn new(pending: &'a PendingRequests, id: String) -> Self {
        Self { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(&self.id);
    }
}
