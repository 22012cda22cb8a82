use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::manager::ConnectionManager;
use crate::session::{Session, SessionState};
use crate::transport::TransportKind;

/// Outcome of the health checks for one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub connected: bool,
    /// Nothing heard from the server within `stale_after_ms`.
    pub stale: bool,
    /// Still on polling after `upgrade_window_ms` although an upgrade was
    /// possible.
    pub stuck_on_polling: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.connected && !self.stale && !self.stuck_on_polling
    }

    /// Short labels for every failed check.
    pub fn problems(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        if !self.connected {
            problems.push("disconnected");
        }
        if self.stale {
            problems.push("stale");
        }
        if self.stuck_on_polling {
            problems.push("stuck on polling");
        }
        problems
    }
}

pub(crate) fn assess(session: &Session, config: &ClientConfig, now: Instant) -> HealthReport {
    if !session.is_connected() {
        return HealthReport {
            connected: false,
            stale: false,
            stuck_on_polling: false,
        };
    }
    let stale_after = Duration::from_millis(config.health.stale_after_ms);
    let stale = session
        .last_activity()
        .is_none_or(|at| now.saturating_duration_since(at) > stale_after);

    let upgrade_window = Duration::from_millis(config.health.upgrade_window_ms);
    let stuck_on_polling = config.upgrade_possible()
        && session.transport() == Some(TransportKind::Polling)
        && session
            .connected_at()
            .is_some_and(|at| now.saturating_duration_since(at) > upgrade_window);

    HealthReport {
        connected: true,
        stale,
        stuck_on_polling,
    }
}

/// What [`ConnectionManager::ensure_healthy`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    Healthy,
    /// Connected but failing checks; the link was torn down and reopened.
    ForcedReconnect,
    /// Was disconnected; a connect was started.
    Connecting,
    /// A connect or retry is already under way.
    InProgress,
}

impl ConnectionManager {
    pub fn health_report(&self) -> HealthReport {
        let now = Instant::now();
        self.with_session(|session| assess(session, self.config(), now))
    }

    pub fn is_connection_healthy(&self) -> bool {
        self.health_report().is_healthy()
    }

    /// Repair the session if it is unhealthy or down.
    pub fn ensure_healthy(&self) -> HealthAction {
        let report = self.health_report();
        if report.is_healthy() {
            return HealthAction::Healthy;
        }
        if report.connected {
            tracing::warn!(problems = ?report.problems(), "Connection unhealthy; forcing reconnect");
            self.force_reconnect();
            return HealthAction::ForcedReconnect;
        }
        match self.state() {
            SessionState::Connecting | SessionState::Reconnecting => HealthAction::InProgress,
            _ => {
                self.connect();
                HealthAction::Connecting
            },
        }
    }
}
