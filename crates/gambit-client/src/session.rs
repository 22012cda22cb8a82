//! Connection lifecycle bookkeeping, free of I/O.
//!
//! The manager's driver task feeds transport outcomes into a [`Session`]
//! and acts on what it returns; all timing decisions are made here so they
//! can be tested without a runtime.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::config::ReconnectionConfig;
use crate::transport::TransportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Retry ceiling reached; only an explicit connect leaves this state.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Decision after a failed or dropped link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Retry {
    Scheduled {
        attempt: u32,
        delay: Duration,
        base: Duration,
    },
    Exhausted {
        attempts: u32,
    },
    Disabled,
}

#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    connection_id: Option<String>,
    transport: Option<TransportKind>,
    last_error: Option<String>,
    attempts: u32,
    max_attempts: u32,
    reconnect_enabled: bool,
    backoff: Backoff,
    connected_at: Option<Instant>,
    last_activity: Option<Instant>,
    latency: Option<Duration>,
    /// Successful opens that followed at least one retry.
    reconnects: u64,
}

impl Session {
    pub fn new(config: &ReconnectionConfig) -> Self {
        Self {
            state: SessionState::Disconnected,
            connection_id: None,
            transport: None,
            last_error: None,
            attempts: 0,
            max_attempts: config.max_attempts,
            reconnect_enabled: config.enabled,
            backoff: Backoff::from_config(config),
            connected_at: None,
            last_activity: None,
            latency: None,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Whether a driver is (or should be) working on a link.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connecting | SessionState::Connected | SessionState::Reconnecting
        )
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn transport(&self) -> Option<TransportKind> {
        self.transport
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    pub fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Enter `Connecting` unless a driver is already active. A fresh start
    /// from `Disconnected` or `Failed` clears the retry counter.
    pub fn begin_connect(&mut self) -> bool {
        if self.is_active() {
            return false;
        }
        self.attempts = 0;
        self.state = SessionState::Connecting;
        true
    }

    /// Record an open link. Returns the retry count that preceded it when
    /// this open ends a reconnect sequence.
    pub fn opened(&mut self, connection_id: String, kind: TransportKind, now: Instant) -> Option<u32> {
        let after_retries = (self.attempts > 0).then_some(self.attempts);
        if after_retries.is_some() {
            self.reconnects += 1;
        }
        self.state = SessionState::Connected;
        self.connection_id = Some(connection_id);
        self.transport = Some(kind);
        self.last_error = None;
        self.attempts = 0;
        self.connected_at = Some(now);
        self.last_activity = Some(now);
        self.latency = None;
        after_retries
    }

    /// Record an unsolicited link loss. Returns true if the session was
    /// connected, in which case a `connection_status` change is due.
    pub fn dropped(&mut self, reason: &str) -> bool {
        let was_connected = self.is_connected();
        self.clear_link();
        self.last_error = Some(reason.to_string());
        self.state = SessionState::Disconnected;
        was_connected
    }

    pub fn connect_failed(&mut self, error: &str) {
        self.clear_link();
        self.last_error = Some(error.to_string());
        self.state = SessionState::Disconnected;
    }

    /// Decide what follows a failure, advancing the retry counter.
    pub fn next_retry(&mut self) -> Retry {
        if !self.reconnect_enabled {
            self.state = SessionState::Disconnected;
            return Retry::Disabled;
        }
        if self.attempts >= self.max_attempts {
            self.state = SessionState::Failed;
            return Retry::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.state = SessionState::Reconnecting;
        Retry::Scheduled {
            attempt: self.attempts,
            delay: self.backoff.delay(self.attempts),
            base: self.backoff.base(self.attempts),
        }
    }

    /// Client-initiated teardown. Returns true if the session was connected.
    pub fn close(&mut self) -> bool {
        let was_connected = self.is_connected();
        self.clear_link();
        self.state = SessionState::Disconnected;
        was_connected
    }

    /// Teardown that also forgets retry history.
    pub fn reset(&mut self) -> bool {
        let was_connected = self.close();
        self.attempts = 0;
        self.last_error = None;
        was_connected
    }

    pub fn upgraded(&mut self, kind: TransportKind, now: Instant) {
        if self.is_connected() {
            self.transport = Some(kind);
            self.last_activity = Some(now);
        }
    }

    pub fn touch(&mut self, now: Instant) {
        if self.is_connected() {
            self.last_activity = Some(now);
        }
    }

    pub fn record_latency(&mut self, latency: Duration) {
        self.latency = Some(latency);
    }

    fn clear_link(&mut self) {
        self.connection_id = None;
        self.transport = None;
        self.connected_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> ReconnectionConfig {
        ReconnectionConfig {
            max_attempts,
            jitter_factor: 0.0,
            ..ReconnectionConfig::default()
        }
    }

    #[test]
    fn first_open_is_not_a_reconnect() {
        let mut s = Session::new(&config(5));
        assert!(s.begin_connect());
        assert_eq!(s.state(), SessionState::Connecting);
        assert_eq!(s.opened("a".into(), TransportKind::Polling, Instant::now()), None);
        assert!(s.is_connected());
        assert_eq!(s.connection_id(), Some("a"));
        assert_eq!(s.transport(), Some(TransportKind::Polling));
    }

    #[test]
    fn begin_connect_refused_while_active() {
        let mut s = Session::new(&config(5));
        assert!(s.begin_connect());
        assert!(!s.begin_connect());
        s.opened("a".into(), TransportKind::WebSocket, Instant::now());
        assert!(!s.begin_connect());
    }

    #[test]
    fn drop_then_recover_reports_attempts_and_resets() {
        let mut s = Session::new(&config(5));
        s.begin_connect();
        s.opened("a".into(), TransportKind::WebSocket, Instant::now());

        assert!(s.dropped("transport close"));
        assert_eq!(s.connection_id(), None);
        assert_eq!(s.last_error(), Some("transport close"));
        assert!(matches!(s.next_retry(), Retry::Scheduled { attempt: 1, .. }));
        assert_eq!(s.state(), SessionState::Reconnecting);
        s.connect_failed("refused");
        assert!(matches!(s.next_retry(), Retry::Scheduled { attempt: 2, .. }));

        assert_eq!(s.opened("b".into(), TransportKind::WebSocket, Instant::now()), Some(2));
        assert_eq!(s.attempts(), 0);
        assert_eq!(s.reconnects(), 1);
        assert_eq!(s.last_error(), None);
    }

    #[test]
    fn ceiling_is_reached_after_max_attempts() {
        let mut s = Session::new(&config(3));
        s.begin_connect();
        let mut scheduled = 0;
        loop {
            s.connect_failed("refused");
            match s.next_retry() {
                Retry::Scheduled { .. } => scheduled += 1,
                Retry::Exhausted { attempts } => {
                    assert_eq!(attempts, 3);
                    break;
                },
                Retry::Disabled => panic!("reconnection is enabled"),
            }
        }
        assert_eq!(scheduled, 3);
        assert_eq!(s.state(), SessionState::Failed);
        assert!(!s.is_active());

        // An explicit connect starts a fresh sequence.
        assert!(s.begin_connect());
        assert_eq!(s.attempts(), 0);
    }

    #[test]
    fn scheduled_bases_are_non_decreasing() {
        let mut s = Session::new(&config(8));
        s.begin_connect();
        let mut bases = Vec::new();
        while let Retry::Scheduled { base, delay, .. } = s.next_retry() {
            assert_eq!(delay, base);
            bases.push(base);
        }
        assert_eq!(bases.len(), 8);
        assert!(bases.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*bases.last().unwrap(), Duration::from_millis(5000));
    }

    #[test]
    fn disabled_reconnection_stops_immediately() {
        let mut s = Session::new(&ReconnectionConfig {
            enabled: false,
            ..ReconnectionConfig::default()
        });
        s.begin_connect();
        s.connect_failed("refused");
        assert_eq!(s.next_retry(), Retry::Disabled);
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn reset_clears_history() {
        let mut s = Session::new(&config(5));
        s.begin_connect();
        s.connect_failed("refused");
        s.next_retry();
        assert!(!s.reset());
        assert_eq!(s.attempts(), 0);
        assert_eq!(s.last_error(), None);
        assert_eq!(s.state(), SessionState::Disconnected);
    }

    #[test]
    fn activity_only_tracked_while_connected() {
        let mut s = Session::new(&config(5));
        let t0 = Instant::now();
        s.touch(t0);
        assert_eq!(s.last_activity(), None);
        s.begin_connect();
        s.opened("a".into(), TransportKind::Polling, t0);
        let t1 = t0 + Duration::from_secs(3);
        s.upgraded(TransportKind::WebSocket, t1);
        assert_eq!(s.last_activity(), Some(t1));
        assert_eq!(s.transport(), Some(TransportKind::WebSocket));
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(serde_json::to_string(&SessionState::Failed).unwrap(), "\"failed\"");
    }
}
