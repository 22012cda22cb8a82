//! A small in-process Socket.IO chess server for integration tests.
//!
//! Speaks Engine.IO v4 over both long-polling and WebSocket (including the
//! polling -> websocket upgrade) and answers game actions with canned
//! replies. Every client event it receives is recorded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use gambit_client::events::names;
use gambit_client::{ClientConfig, ClientEvent, ConnectionManager, TransportKind};
use gambit_core::net::messages::ServerMessage;
use gambit_core::net::protocol::{
    EnginePacket, HandshakeInfo, SocketPacket, decode_payload, encode_payload,
    encode_server_message,
};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    /// Offer `websocket` in the polling handshake.
    pub advertise_websocket: bool,
    /// Refuse every namespace connect with this message.
    pub reject_connect: Option<String>,
    /// Answer WebSocket requests with 400, as a blocking proxy would.
    pub refuse_websocket: bool,
    /// Sent over polling after the probe reply and before the upgrade
    /// packet arrives.
    pub event_during_upgrade: Option<ServerMessage>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            ping_interval_ms: 1000,
            ping_timeout_ms: 2000,
            advertise_websocket: true,
            reject_connect: None,
            refuse_websocket: false,
            event_during_upgrade: None,
        }
    }
}

type Outgoing = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<EnginePacket>>>;

struct Conn {
    tx: mpsc::UnboundedSender<EnginePacket>,
    rx: Outgoing,
}

struct ServerState {
    options: ServerOptions,
    next_sid: AtomicU64,
    conns: Mutex<HashMap<String, Conn>>,
    received: Mutex<Vec<(String, Option<Value>)>>,
    namespace_connects: AtomicUsize,
    upgrades: AtomicUsize,
    client_disconnects: AtomicUsize,
}

impl ServerState {
    fn open_conn(self: &Arc<Self>) -> (String, Outgoing) {
        let sid = format!("sid-{}", self.next_sid.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        self.conns.lock().unwrap().insert(
            sid.clone(),
            Conn {
                tx: tx.clone(),
                rx: Arc::clone(&rx),
            },
        );

        let interval = Duration::from_millis(self.options.ping_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if tx.send(EnginePacket::Ping(String::new())).is_err() {
                    return;
                }
            }
        });
        (sid, rx)
    }

    fn handshake(&self, sid: &str, over_websocket: bool) -> HandshakeInfo {
        let upgrades = if !over_websocket && self.options.advertise_websocket {
            vec!["websocket".to_string()]
        } else {
            Vec::new()
        };
        HandshakeInfo {
            sid: sid.to_string(),
            upgrades,
            ping_interval: self.options.ping_interval_ms,
            ping_timeout: self.options.ping_timeout_ms,
            max_payload: Some(1_000_000),
        }
    }

    fn outgoing(&self, sid: &str) -> Option<Outgoing> {
        self.conns.lock().unwrap().get(sid).map(|c| Arc::clone(&c.rx))
    }

    fn push(&self, sid: &str, packet: EnginePacket) {
        if let Some(conn) = self.conns.lock().unwrap().get(sid) {
            let _ = conn.tx.send(packet);
        }
    }

    fn push_socket(&self, sid: &str, packet: SocketPacket) {
        self.push(sid, EnginePacket::Message(packet.encode().unwrap()));
    }

    fn remove(&self, sid: &str) {
        self.conns.lock().unwrap().remove(sid);
    }

    /// Handle one packet from the client. Returns false once the
    /// connection should close.
    fn on_client_packet(&self, sid: &str, packet: EnginePacket) -> bool {
        match packet {
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(SocketPacket::Connect(_)) => {
                    match &self.options.reject_connect {
                        Some(reason) => {
                            self.push_socket(sid, SocketPacket::ConnectError(json!({ "message": reason })));
                        },
                        None => {
                            self.namespace_connects.fetch_add(1, Ordering::SeqCst);
                            self.push_socket(sid, SocketPacket::Connect(Some(json!({ "sid": format!("io-{sid}") }))));
                        },
                    }
                    true
                },
                Ok(SocketPacket::Event { name, data, .. }) => {
                    self.received
                        .lock()
                        .unwrap()
                        .push((name.clone(), data.clone()));
                    if let Some((reply, payload)) = reply_to(&name, data.unwrap_or(Value::Null)) {
                        self.push_socket(sid, SocketPacket::event(reply, Some(payload)));
                    }
                    true
                },
                Ok(SocketPacket::Disconnect) => {
                    self.client_disconnects.fetch_add(1, Ordering::SeqCst);
                    self.remove(sid);
                    false
                },
                _ => true,
            },
            EnginePacket::Close => {
                self.remove(sid);
                false
            },
            _ => true,
        }
    }
}

/// Canned game-server behavior.
fn reply_to(name: &str, data: Value) -> Option<(&'static str, Value)> {
    let request_id = data.get("requestId").cloned().unwrap_or(Value::Null);
    let game_id = data.get("gameId").cloned().unwrap_or(Value::Null);
    let reply = match name {
        "authenticate" => (
            "authenticated",
            json!({
                "userId": data["userId"],
                "username": data["username"],
                "rating": data["rating"],
                "requestId": request_id,
            }),
        ),
        "join_matchmaking" => (
            "matchmaking_joined",
            json!({ "timeControl": data["timeControl"], "queuePosition": 1 }),
        ),
        "leave_matchmaking" => ("matchmaking_left", json!({})),
        "join_game" => {
            if game_id.as_str().is_some_and(|g| g.starts_with("missing")) {
                (
                    "game_not_found",
                    json!({ "message": "Game not found", "gameId": game_id, "requestId": request_id }),
                )
            } else {
                (
                    "game_started",
                    json!({
                        "gameId": game_id,
                        "playerColor": "white",
                        "fen": START_FEN,
                        "requestId": request_id,
                    }),
                )
            }
        },
        "make_move" => (
            "move_made",
            json!({
                "gameId": game_id,
                "move": data["move"],
                "fen": START_FEN,
                "timeLeft": data["timeLeft"],
            }),
        ),
        "send_chat_message" => (
            "chat_message",
            json!({
                "gameId": game_id,
                "message": { "username": "Alice", "message": data["message"], "timestamp": 0 },
            }),
        ),
        "resign_game" | "resign" => (
            "game_ended",
            json!({ "gameId": game_id, "reason": "resignation", "winner": "black" }),
        ),
        "offer_draw" => ("draw_offered", json!({ "gameId": game_id, "by": "white" })),
        "decline_draw" => ("draw_declined", json!({ "gameId": game_id })),
        "ping" => ("pong", json!({ "timestamp": data["timestamp"] })),
        _ => return None,
    };
    Some(reply)
}

#[derive(Debug, Deserialize)]
struct EngineQuery {
    transport: String,
    sid: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        json!({ "code": 1, "message": message }).to_string(),
    )
        .into_response()
}

async fn engine_get(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EngineQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match query.transport.as_str() {
        "websocket" if state.options.refuse_websocket => bad_request("Transport unknown"),
        "websocket" => match ws {
            Ok(upgrade) => upgrade
                .on_upgrade(move |socket| serve_websocket(state, socket, query.sid))
                .into_response(),
            Err(rejection) => rejection.into_response(),
        },
        "polling" => match query.sid {
            None => {
                let (sid, _) = state.open_conn();
                let open = EnginePacket::Open(state.handshake(&sid, false));
                encode_payload(&[open]).unwrap().into_response()
            },
            Some(sid) => long_poll(state, sid).await,
        },
        _ => bad_request("Transport unknown"),
    }
}

async fn long_poll(state: Arc<ServerState>, sid: String) -> Response {
    let Some(outgoing) = state.outgoing(&sid) else {
        return bad_request("Session ID unknown");
    };
    let mut rx = outgoing.lock().await;
    let first = rx.recv().await.unwrap_or(EnginePacket::Close);
    let mut packets = vec![first];
    while let Ok(packet) = rx.try_recv() {
        packets.push(packet);
    }
    if packets.contains(&EnginePacket::Close) {
        state.remove(&sid);
    }
    encode_payload(&packets).unwrap().into_response()
}

async fn engine_post(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EngineQuery>,
    body: String,
) -> Response {
    let Some(sid) = query.sid else {
        return bad_request("Session ID unknown");
    };
    if state.outgoing(&sid).is_none() {
        return bad_request("Session ID unknown");
    }
    let Ok(packets) = decode_payload(&body) else {
        return bad_request("Bad request");
    };
    for packet in packets {
        state.on_client_packet(&sid, packet);
    }
    "ok".into_response()
}

async fn next_packet(stream: &mut futures::stream::SplitStream<WebSocket>) -> Option<EnginePacket> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return EnginePacket::decode(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn serve_websocket(state: Arc<ServerState>, socket: WebSocket, upgrade_sid: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    let (sid, outgoing) = match upgrade_sid {
        None => {
            let (sid, outgoing) = state.open_conn();
            let open = EnginePacket::Open(state.handshake(&sid, true)).encode().unwrap();
            if sink.send(Message::Text(open.into())).await.is_err() {
                state.remove(&sid);
                return;
            }
            (sid, outgoing)
        },
        Some(sid) => {
            let Some(outgoing) = state.outgoing(&sid) else {
                return;
            };
            match next_packet(&mut stream).await {
                Some(EnginePacket::Ping(probe)) if probe == "probe" => {},
                _ => return,
            }
            let pong = EnginePacket::Pong("probe".into()).encode().unwrap();
            if sink.send(Message::Text(pong.into())).await.is_err() {
                return;
            }
            if let Some(msg) = &state.options.event_during_upgrade {
                state.push_socket(&sid, encode_server_message(msg).unwrap());
            }
            // Keep releasing parked long-polls until the client commits.
            let upgrading = Arc::new(AtomicBool::new(true));
            {
                let state = Arc::clone(&state);
                let sid = sid.clone();
                let upgrading = Arc::clone(&upgrading);
                tokio::spawn(async move {
                    while upgrading.load(Ordering::SeqCst) && state.outgoing(&sid).is_some() {
                        state.push(&sid, EnginePacket::Noop);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                });
            }
            let committed = next_packet(&mut stream).await;
            upgrading.store(false, Ordering::SeqCst);
            match committed {
                Some(EnginePacket::Upgrade) => {
                    state.upgrades.fetch_add(1, Ordering::SeqCst);
                },
                _ => return,
            }
            (sid, outgoing)
        },
    };

    let mut rx = outgoing.lock().await;
    loop {
        tokio::select! {
            out = rx.recv() => {
                let Some(packet) = out else { break };
                let closing = packet == EnginePacket::Close;
                let Ok(frame) = packet.encode() else { continue };
                if sink.send(Message::Text(frame.into())).await.is_err() || closing {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(packet) = EnginePacket::decode(text.as_str())
                        && !state.on_client_packet(&sid, packet)
                    {
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {},
            },
        }
    }
    state.remove(&sid);
}

pub struct TestServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    _shutdown: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_options(ServerOptions::default()).await
    }

    pub async fn with_options(options: ServerOptions) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(ServerState {
            options,
            next_sid: AtomicU64::new(0),
            conns: Mutex::new(HashMap::new()),
            received: Mutex::new(Vec::new()),
            namespace_connects: AtomicUsize::new(0),
            upgrades: AtomicUsize::new(0),
            client_disconnects: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/socket.io/", get(engine_get).post(engine_post))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Give the server a moment to start accepting
        tokio::time::sleep(Duration::from_millis(20)).await;

        Self {
            addr,
            state,
            _shutdown: handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client configuration with short timers, pointed at this server.
    pub fn client_config(&self, transports: &[TransportKind]) -> ClientConfig {
        let mut config = ClientConfig::with_endpoint(self.base_url());
        config.transports = transports.to_vec();
        config.connect_timeout_ms = 2000;
        config.reconnection.initial_delay_ms = 50;
        config.reconnection.max_delay_ms = 200;
        config.reconnection.jitter_factor = 0.0;
        config.requests.timeout_ms = 2000;
        config.health.probe_latency = false;
        config
    }

    /// Data of every `name` event received so far.
    pub fn received(&self, name: &str) -> Vec<Option<Value>> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn broadcast(&self, msg: &ServerMessage) {
        let packet = encode_server_message(msg).unwrap();
        let sids: Vec<String> = self.state.conns.lock().unwrap().keys().cloned().collect();
        for sid in sids {
            self.state.push_socket(&sid, packet.clone());
        }
    }

    /// Close every engine session from the server side.
    pub fn kick_all(&self) {
        let sids: Vec<String> = self.state.conns.lock().unwrap().keys().cloned().collect();
        for sid in sids {
            self.state.push(&sid, EnginePacket::Close);
        }
    }

    pub fn namespace_connects(&self) -> usize {
        self.state.namespace_connects.load(Ordering::SeqCst)
    }

    pub fn upgrades(&self) -> usize {
        self.state.upgrades.load(Ordering::SeqCst)
    }

    pub fn client_disconnects(&self) -> usize {
        self.state.client_disconnects.load(Ordering::SeqCst)
    }
}

/// A port nothing listens on.
pub async fn dead_endpoint() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Poll `check` until it holds or five seconds pass.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collects every event published under the given names.
pub fn record(manager: &ConnectionManager, events: &[&str]) -> Arc<Mutex<Vec<ClientEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event in events {
        let sink = Arc::clone(&log);
        let _ = manager.on(event, move |e| sink.lock().unwrap().push(e.clone()));
    }
    log
}

pub fn lifecycle_events() -> [&'static str; 5] {
    [
        names::CONNECTION_STATUS,
        names::CONNECTION_ERROR,
        names::RECONNECT_ATTEMPT,
        names::RECONNECTED,
        names::RECONNECT_FAILED,
    ]
}
