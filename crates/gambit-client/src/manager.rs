//! The connection owner.
//!
//! A [`ConnectionManager`] is a cheap handle; clones share one session, one
//! event bus and one driver task. Each call to `connect` that actually
//! starts work bumps a generation counter, and every state change made by a
//! driver is checked against it, so a driver that was superseded by
//! `disconnect` or `force_reconnect` can never touch the new session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use gambit_core::net::messages::{ClientMessage, ServerMessage, TimestampMsg};
use gambit_core::net::protocol::{SocketPacket, decode_server_message, encode_client_message};
use gambit_core::time::unix_millis;

use crate::bus::{EventBus, Subscription, SubscriptionId};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::requests::{Expectation, PendingGuard, PendingRequests};
use crate::session::{Retry, Session, SessionState};
use crate::transport::{Connector, Link, LinkEvent, Outbound, SocketIoConnector};

struct Inner {
    session: Session,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    driver: Option<JoinHandle<()>>,
    ping_sent_at: Option<Instant>,
}

pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    connector: Arc<dyn Connector>,
    pub(crate) bus: EventBus,
    pub(crate) pending: PendingRequests,
    inner: Mutex<Inner>,
}

#[derive(Clone)]
pub struct ConnectionManager {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.shared.config.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Build a manager without connecting.
    pub fn new(config: ClientConfig, connector: impl Connector) -> Result<Self, ClientError> {
        config.validate()?;
        let session = Session::new(&config.reconnection);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector: Arc::new(connector),
                bus: EventBus::new(),
                pending: PendingRequests::default(),
                inner: Mutex::new(Inner {
                    session,
                    generation: 0,
                    outbound: None,
                    driver: None,
                    ping_sent_at: None,
                }),
            }),
        })
    }

    /// Manager speaking Socket.IO to `config.endpoint`.
    pub fn with_socket_io(config: ClientConfig) -> Result<Self, ClientError> {
        Self::new(config, SocketIoConnector::new())
    }

    /// Build and immediately connect. Must be called inside a Tokio runtime.
    pub fn start(config: ClientConfig, connector: impl Connector) -> Result<Self, ClientError> {
        let manager = Self::new(config, connector)?;
        manager.connect();
        Ok(manager)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on(event, callback)
    }

    pub fn off(&self, event: &str, id: Option<SubscriptionId>) -> usize {
        self.shared.bus.off(event, id)
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().session.is_connected()
    }

    /// Server-assigned id of the current link; `None` unless connected.
    pub fn connection_id(&self) -> Option<String> {
        self.shared.lock().session.connection_id().map(str::to_string)
    }

    /// Start connecting unless already connected or connecting.
    pub fn connect(&self) {
        let mut inner = self.shared.lock();
        if !inner.session.begin_connect() {
            tracing::debug!(state = %inner.session.state(), "Connect ignored; session already active");
            return;
        }
        inner.generation += 1;
        let generation = inner.generation;
        tracing::info!(endpoint = %self.shared.config.endpoint, generation, "Connecting");
        let driver = tokio::spawn(drive(Arc::clone(&self.shared), generation));
        if let Some(stale) = inner.driver.replace(driver) {
            stale.abort();
        }
    }

    /// Close the link and stop reconnecting.
    pub fn disconnect(&self) {
        if self.shared.teardown(false) {
            tracing::info!("Disconnected by client");
            self.shared
                .bus
                .emit(&ClientEvent::disconnected("io client disconnect"));
        }
    }

    /// Tear down whatever exists, clear retry history and connect afresh.
    pub fn force_reconnect(&self) {
        tracing::info!("Forcing reconnect");
        if self.shared.teardown(true) {
            self.shared
                .bus
                .emit(&ClientEvent::disconnected("forced reconnect"));
        }
        self.connect();
    }

    /// Write `msg` to the live link.
    pub fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        self.shared.send(msg)
    }

    /// Send `msg` and wait for the reply `expect` describes.
    pub(crate) async fn request(
        &self,
        msg: ClientMessage,
        request_id: String,
        expect: Expectation,
        game_id: Option<String>,
    ) -> Result<ServerMessage, ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let rx = self.shared.pending.register(request_id.clone(), expect, game_id);
        let _guard = PendingGuard::new(&self.shared.pending, request_id);
        self.shared.send(&msg)?;
        match tokio::time::timeout(self.shared.config.request_timeout(), rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                tracing::warn!(event = msg.event_name(), "Request timed out");
                Err(ClientError::Timeout)
            },
        }
    }

    pub(crate) fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.shared.lock().session)
    }

    pub(crate) fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` only if `generation` is still current.
    fn current<R>(&self, generation: u64, f: impl FnOnce(&mut Inner) -> R) -> Option<R> {
        let mut inner = self.lock();
        if inner.generation != generation {
            return None;
        }
        Some(f(&mut inner))
    }

    fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        let outbound = {
            let inner = self.lock();
            if inner.session.is_connected() {
                inner.outbound.clone()
            } else {
                None
            }
        };
        let Some(outbound) = outbound else {
            tracing::warn!(event = msg.event_name(), "Not connected; message not sent");
            return Err(ClientError::NotConnected);
        };

        let mut packet = encode_client_message(msg)?;
        if let (ClientMessage::ResignGame(_), SocketPacket::Event { name, .. }) = (msg, &mut packet) {
            *name = self.config.protocol.resign_event.as_str().to_string();
        }
        tracing::trace!(event = msg.event_name(), "Sending");
        outbound
            .send(Outbound::Packet(packet))
            .map_err(|_| ClientError::Transport("link closed".into()))
    }

    /// Invalidate the current generation and release its resources.
    /// Returns true if the session was connected.
    fn teardown(&self, reset: bool) -> bool {
        let (was_connected, outbound, driver) = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.ping_sent_at = None;
            let was_connected = if reset {
                inner.session.reset()
            } else {
                inner.session.close()
            };
            (was_connected, inner.outbound.take(), inner.driver.take())
        };
        if let Some(outbound) = outbound {
            let _ = outbound.send(Outbound::Close);
        }
        if let Some(driver) = driver {
            driver.abort();
        }
        let failed = self.pending.fail_all(&ClientError::Disconnected);
        if failed > 0 {
            tracing::debug!(failed, "Failed pending requests on teardown");
        }
        was_connected
    }

    /// Register an open link. Returns `None` if the generation is stale.
    fn link_opened(&self, generation: u64, link: &Link) -> Option<Option<u32>> {
        let now = Instant::now();
        self.current(generation, |inner| {
            inner.outbound = Some(link.outbound.clone());
            inner.session.opened(link.connection_id.clone(), link.kind, now)
        })
    }

    /// Returns false if the generation is stale.
    fn link_lost(&self, generation: u64, reason: &str) -> bool {
        let Some(was_connected) = self.current(generation, |inner| {
            inner.outbound = None;
            inner.ping_sent_at = None;
            inner.session.dropped(reason)
        }) else {
            return false;
        };
        tracing::warn!(reason, "Connection lost");
        self.pending.fail_all(&ClientError::Disconnected);
        if was_connected {
            self.bus.emit(&ClientEvent::disconnected(reason));
        }
        true
    }

    fn connect_failed(&self, generation: u64, error: &str) -> bool {
        if self
            .current(generation, |inner| inner.session.connect_failed(error))
            .is_none()
        {
            return false;
        }
        tracing::warn!(error, "Connection attempt failed");
        self.bus.emit(&ClientEvent::ConnectionError {
            error: error.to_string(),
        });
        true
    }

    /// Delay before the next attempt, or `None` when the driver should stop.
    fn schedule_retry(&self, generation: u64) -> Option<Duration> {
        let (retry, max_attempts) = self.current(generation, |inner| {
            let retry = inner.session.next_retry();
            if !matches!(retry, Retry::Scheduled { .. }) {
                inner.driver = None;
            }
            (retry, inner.session.max_attempts())
        })?;
        match retry {
            Retry::Scheduled { attempt, delay, .. } => {
                tracing::info!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.bus.emit(&ClientEvent::ReconnectAttempt { attempt, delay });
                Some(delay)
            },
            Retry::Exhausted { attempts } => {
                tracing::error!(attempts, "Reconnect attempts exhausted");
                self.bus.emit(&ClientEvent::ReconnectFailed { attempts });
                None
            },
            Retry::Disabled => {
                tracing::info!("Reconnection disabled; staying disconnected");
                None
            },
        }
    }

    fn send_ping(&self, generation: u64) {
        let armed = self.current(generation, |inner| {
            inner.ping_sent_at = Some(Instant::now());
        });
        if armed.is_some()
            && let Err(e) = self.send(&ClientMessage::Ping(TimestampMsg {
                timestamp: unix_millis(),
            }))
        {
            tracing::debug!(error = %e, "Latency probe not sent");
        }
    }

    /// Deliver one inbound event. Subscribers run before this returns.
    fn dispatch(&self, generation: u64, name: String, data: Option<Value>) {
        let now = Instant::now();
        if self
            .current(generation, |inner| inner.session.touch(now))
            .is_none()
        {
            return;
        }

        let event = match decode_server_message(&name, data.clone()) {
            Ok(msg) => ClientEvent::Server(msg),
            Err(e) => {
                if ServerMessage::is_known_event(&name) {
                    tracing::warn!(event = %name, error = %e, "Malformed payload; delivering raw");
                } else {
                    tracing::debug!(event = %name, "Unrecognized event");
                }
                if self.pending.resolve_malformed(&name, data.as_ref()) {
                    tracing::debug!(event = %name, "Undecodable reply settled a pending request");
                }
                ClientEvent::Unrecognized { name, data }
            },
        };

        if let ClientEvent::Server(msg) = &event {
            match msg {
                ServerMessage::Heartbeat(beat) => {
                    let timestamp = unix_millis().max(beat.timestamp);
                    if let Err(e) = self.send(&ClientMessage::HeartbeatAck(TimestampMsg { timestamp })) {
                        tracing::debug!(error = %e, "Heartbeat not acknowledged");
                    }
                },
                ServerMessage::Pong(_) => {
                    self.current(generation, |inner| {
                        if let Some(sent) = inner.ping_sent_at.take() {
                            inner.session.record_latency(now.saturating_duration_since(sent));
                        }
                    });
                },
                _ => {},
            }
            self.pending.resolve(msg);
        }

        self.bus.emit(&event);
    }

    /// Pump one link until it closes. Returns the close reason, or `None`
    /// if this driver was superseded.
    async fn run_link(&self, generation: u64, mut link: Link) -> Option<String> {
        let Some(after_retries) = self.link_opened(generation, &link) else {
            let _ = link.outbound.send(Outbound::Close);
            return None;
        };
        tracing::info!(
            connection_id = %link.connection_id,
            transport = %link.kind,
            "Connected"
        );
        self.bus.emit(&ClientEvent::connected());
        if let Some(attempts) = after_retries {
            tracing::info!(attempts, "Reconnected");
            self.bus.emit(&ClientEvent::Reconnected { attempts });
        }
        if self.config.health.probe_latency {
            self.send_ping(generation);
        }

        while let Some(event) = link.inbound.recv().await {
            match event {
                LinkEvent::Event { name, data } => self.dispatch(generation, name, data),
                LinkEvent::Keepalive => {
                    self.current(generation, |inner| inner.session.touch(Instant::now()));
                },
                LinkEvent::Upgraded(kind) => {
                    if self
                        .current(generation, |inner| inner.session.upgraded(kind, Instant::now()))
                        .is_some()
                    {
                        tracing::info!(transport = %kind, "Transport upgraded");
                    }
                },
                LinkEvent::Closed { reason } => return Some(reason),
            }
        }
        Some("transport close".into())
    }
}

/// One generation's connect/pump/retry loop.
async fn drive(shared: Arc<Shared>, generation: u64) {
    loop {
        let attempt = tokio::time::timeout(
            shared.config.connect_timeout(),
            shared.connector.connect(&shared.config),
        )
        .await;
        let proceed = match attempt {
            Ok(Ok(link)) => match shared.run_link(generation, link).await {
                Some(reason) => shared.link_lost(generation, &reason),
                None => false,
            },
            Ok(Err(e)) => shared.connect_failed(generation, &e.to_string()),
            Err(_) => shared.connect_failed(generation, "connect timeout"),
        };
        if !proceed {
            return;
        }
        match shared.schedule_retry(generation) {
            Some(delay) => tokio::time::sleep(delay).await,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use gambit_core::game::PieceColor;
    use gambit_core::test_helpers::{e2e4, game_started, heartbeat};

    use super::*;
    use crate::events::names;
    use crate::transport::TransportKind;
    use crate::transport::mock::{MockConnector, MockOutcome};

    fn test_config() -> ClientConfig {
        let mut config = ClientConfig::with_endpoint("http://127.0.0.1:3001");
        config.health.probe_latency = false;
        config.reconnection.jitter_factor = 0.0;
        config
    }

    fn manager(mock: &MockConnector) -> ConnectionManager {
        ConnectionManager::new(test_config(), mock.clone()).unwrap()
    }

    /// Let spawned tasks run until they block; with paused time this also
    /// fires any timer that is due.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn record(manager: &ConnectionManager, event: &str) -> Arc<Mutex<Vec<ClientEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let _ = manager.on(event, move |e| sink.lock().unwrap().push(e.clone()));
        log
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_connects_and_emits_status() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let status = record(&m, names::CONNECTION_STATUS);

        assert!(!m.is_connected());
        m.connect();
        settle().await;

        assert!(m.is_connected());
        assert_eq!(m.connection_id().as_deref(), Some("mock-1"));
        assert_eq!(*status.lock().unwrap(), vec![ClientEvent::connected()]);
        assert_eq!(mock.connect_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        m.connect();
        m.connect();
        settle().await;
        m.connect();
        settle().await;
        assert_eq!(mock.connect_calls(), 1);
        assert!(m.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn drop_and_recover_reports_attempts() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let status = record(&m, names::CONNECTION_STATUS);
        let reconnected = record(&m, names::RECONNECTED);
        let attempts = record(&m, names::RECONNECT_ATTEMPT);

        m.connect();
        settle().await;
        mock.refuse_next(1);
        assert!(mock.drop_link("transport close"));
        settle().await;
        assert!(!m.is_connected());
        assert_eq!(m.connection_id(), None);

        // First retry after 1s is refused, second after 2s succeeds.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert!(!m.is_connected());
        tokio::time::sleep(Duration::from_millis(2000)).await;
        settle().await;

        assert!(m.is_connected());
        assert_eq!(m.connection_id().as_deref(), Some("mock-2"));
        assert_eq!(
            *reconnected.lock().unwrap(),
            vec![ClientEvent::Reconnected { attempts: 2 }]
        );
        assert_eq!(attempts.lock().unwrap().len(), 2);
        assert_eq!(
            *status.lock().unwrap(),
            vec![
                ClientEvent::connected(),
                ClientEvent::disconnected("transport close"),
                ClientEvent::connected(),
            ]
        );
        assert_eq!(m.with_session(Session::attempts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ceiling_emits_failure_once() {
        let mock = MockConnector::new();
        let mut config = test_config();
        config.reconnection.max_attempts = 3;
        let m = ConnectionManager::new(config, mock.clone()).unwrap();
        let attempts = record(&m, names::RECONNECT_ATTEMPT);
        let failed = record(&m, names::RECONNECT_FAILED);
        let errors = record(&m, names::CONNECTION_ERROR);

        mock.refuse_next(10);
        m.connect();
        tokio::time::sleep(Duration::from_secs(60)).await;

        // One initial attempt plus three retries.
        assert_eq!(mock.connect_calls(), 4);
        assert_eq!(errors.lock().unwrap().len(), 4);
        let delays: Vec<Duration> = attempts
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                ClientEvent::ReconnectAttempt { delay, .. } => *delay,
                other => panic!("Expected ReconnectAttempt, got: {other:?}"),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
        assert_eq!(
            *failed.lock().unwrap(),
            vec![ClientEvent::ReconnectFailed { attempts: 3 }]
        );
        assert_eq!(m.state(), SessionState::Failed);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(mock.connect_calls(), 4);
        assert_eq!(failed.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconnect_recovers_from_failed() {
        let mock = MockConnector::new();
        let mut config = test_config();
        config.reconnection.max_attempts = 1;
        let m = ConnectionManager::new(config, mock.clone()).unwrap();

        mock.refuse_next(2);
        m.connect();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(m.state(), SessionState::Failed);

        m.force_reconnect();
        settle().await;
        assert!(m.is_connected());
        assert_eq!(mock.connect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn force_reconnect_replaces_live_link() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let status = record(&m, names::CONNECTION_STATUS);
        m.connect();
        settle().await;

        m.force_reconnect();
        settle().await;

        assert!(m.is_connected());
        assert_eq!(m.connection_id().as_deref(), Some("mock-2"));
        assert_eq!(mock.client_closes(), 1);
        assert_eq!(
            *status.lock().unwrap(),
            vec![
                ClientEvent::connected(),
                ClientEvent::disconnected("forced reconnect"),
                ClientEvent::connected(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_reconnecting() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let status = record(&m, names::CONNECTION_STATUS);
        m.connect();
        settle().await;

        m.disconnect();
        assert!(!m.is_connected());
        assert_eq!(m.connection_id(), None);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.connect_calls(), 1);
        assert_eq!(
            status.lock().unwrap().last(),
            Some(&ClientEvent::disconnected("io client disconnect"))
        );

        // Disconnecting twice emits nothing more.
        m.disconnect();
        assert_eq!(status.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_before_connect_fails_and_writes_nothing() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let err = m
            .send(&ClientMessage::MakeMove(e2e4("g1")))
            .unwrap_err();
        assert_eq!(err, ClientError::NotConnected);
        assert!(mock.sent().is_empty());
        assert_eq!(mock.connect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_is_echoed_with_later_timestamp() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let beats = record(&m, "heartbeat");
        m.connect();
        settle().await;

        let ahead = unix_millis() + 60_000;
        mock.inject_server(&heartbeat(ahead));
        mock.inject_server(&heartbeat(1));
        settle().await;

        let acks = mock.sent_named("heartbeat_ack");
        assert_eq!(acks.len(), 2);
        let first = acks[0].as_ref().unwrap()["timestamp"].as_u64().unwrap();
        let second = acks[1].as_ref().unwrap()["timestamp"].as_u64().unwrap();
        assert!(first >= ahead);
        assert!(second >= 1);
        assert_eq!(beats.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_subscriber_gets_each_event_once() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        for counter in [&a, &b] {
            let counter = Arc::clone(counter);
            let _ = m.on("game_started", move |e| {
                assert!(matches!(e.as_server(), Some(ServerMessage::GameStarted(_))));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        m.connect();
        settle().await;
        mock.inject_server(&game_started("g1", PieceColor::White, None));
        settle().await;
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_and_malformed_events_arrive_raw() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let lobby = record(&m, "lobby_update");
        let moves = record(&m, "move_made");
        m.connect();
        settle().await;

        mock.inject("lobby_update", Some(serde_json::json!({"players": 12})));
        mock.inject("move_made", Some(serde_json::json!({"move": 42})));
        settle().await;

        assert_eq!(
            *lobby.lock().unwrap(),
            vec![ClientEvent::Unrecognized {
                name: "lobby_update".into(),
                data: Some(serde_json::json!({"players": 12})),
            }]
        );
        assert!(matches!(
            moves.lock().unwrap()[0],
            ClientEvent::Unrecognized { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_counts_as_failure() {
        let mock = MockConnector::new();
        mock.push_outcome(MockOutcome::Hang);
        let m = manager(&mock);
        let errors = record(&m, names::CONNECTION_ERROR);
        m.connect();
        tokio::time::sleep(m.config().connect_timeout()).await;
        settle().await;
        assert_eq!(
            *errors.lock().unwrap(),
            vec![ClientEvent::ConnectionError {
                error: "connect timeout".into()
            }]
        );
        // The retry after 1s uses the unscripted default and succeeds.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;
        assert!(m.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_probe_records_round_trip() {
        let mock = MockConnector::with_kind(TransportKind::WebSocket);
        let mut config = test_config();
        config.health.probe_latency = true;
        let m = ConnectionManager::new(config, mock.clone()).unwrap();
        m.connect();
        settle().await;
        assert_eq!(mock.sent_named("ping").len(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        mock.inject("pong", Some(serde_json::json!({"timestamp": 0})));
        settle().await;
        let latency = m.with_session(Session::latency).unwrap();
        assert!(latency >= Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_may_disconnect_during_dispatch() {
        let mock = MockConnector::new();
        let m = manager(&mock);
        let handle = m.clone();
        let _ = m.on("game_ended", move |_| handle.disconnect());
        m.connect();
        settle().await;
        mock.inject("game_ended", Some(serde_json::json!({"reason": "checkmate"})));
        settle().await;
        assert!(!m.is_connected());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.connect_calls(), 1);
    }
}
