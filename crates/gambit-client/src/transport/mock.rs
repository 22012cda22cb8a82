//! Scripted in-memory connector for exercising the manager without a server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use serde_json::Value;

use gambit_core::net::messages::ServerMessage;
use gambit_core::net::protocol::{SocketPacket, encode_server_message};

use super::{Connector, Link, LinkEvent, LinkHandle, Outbound, TransportKind};
use crate::config::ClientConfig;
use crate::error::ClientError;

/// How the next `connect` call behaves.
#[derive(Debug, Clone, PartialEq)]
pub enum MockOutcome {
    Accept(TransportKind),
    Refuse(String),
    /// Never resolves; exercises the connect timeout.
    Hang,
}

#[derive(Default)]
struct MockState {
    connect_calls: usize,
    links_opened: usize,
    script: VecDeque<MockOutcome>,
    default_kind: Option<TransportKind>,
    live: Option<LinkHandle>,
    sent: Vec<SocketPacket>,
    closed_by_client: usize,
}

impl MockState {
    fn drain_outbound(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        while let Ok(out) = live.outbound.try_recv() {
            match out {
                Outbound::Packet(packet) => self.sent.push(packet),
                Outbound::Close => self.closed_by_client += 1,
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepted links report `kind` unless a scripted outcome says otherwise.
    pub fn with_kind(kind: TransportKind) -> Self {
        let mock = Self::default();
        mock.lock().default_kind = Some(kind);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the outcome of a future `connect`; unscripted calls accept.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.lock().script.push_back(outcome);
    }

    pub fn refuse_next(&self, times: usize) {
        let mut state = self.lock();
        for _ in 0..times {
            state.script.push_back(MockOutcome::Refuse("connection refused".into()));
        }
    }

    /// Times the manager asked for a link.
    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn links_opened(&self) -> usize {
        self.lock().links_opened
    }

    pub fn has_live_link(&self) -> bool {
        self.lock().live.is_some()
    }

    fn push_inbound(&self, event: LinkEvent) -> bool {
        let mut state = self.lock();
        state.drain_outbound();
        match state.live.as_ref() {
            Some(live) => live.inbound.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver a raw event on the live link.
    pub fn inject(&self, name: &str, data: Option<Value>) -> bool {
        self.push_inbound(LinkEvent::Event {
            name: name.to_string(),
            data,
        })
    }

    pub fn inject_server(&self, msg: &ServerMessage) -> bool {
        match encode_server_message(msg) {
            Ok(SocketPacket::Event { name, data, .. }) => self.inject(&name, data),
            _ => false,
        }
    }

    pub fn keepalive(&self) -> bool {
        self.push_inbound(LinkEvent::Keepalive)
    }

    pub fn upgrade(&self) -> bool {
        self.push_inbound(LinkEvent::Upgraded(TransportKind::WebSocket))
    }

    /// Drop the live link from the server side.
    pub fn drop_link(&self, reason: &str) -> bool {
        let mut state = self.lock();
        state.drain_outbound();
        match state.live.take() {
            Some(live) => live
                .inbound
                .send(LinkEvent::Closed {
                    reason: reason.to_string(),
                })
                .is_ok(),
            None => false,
        }
    }

    /// Every packet written by the client so far, across links.
    pub fn sent(&self) -> Vec<SocketPacket> {
        let mut state = self.lock();
        state.drain_outbound();
        state.sent.clone()
    }

    /// `(event name, data)` of every event written so far.
    pub fn sent_events(&self) -> Vec<(String, Option<Value>)> {
        self.sent()
            .into_iter()
            .filter_map(|p| match p {
                SocketPacket::Event { name, data, .. } => Some((name, data)),
                _ => None,
            })
            .collect()
    }

    pub fn sent_named(&self, name: &str) -> Vec<Option<Value>> {
        self.sent_events()
            .into_iter()
            .filter(|(n, _)| n == name)
            .map(|(_, data)| data)
            .collect()
    }

    pub fn client_closes(&self) -> usize {
        let mut state = self.lock();
        state.drain_outbound();
        state.closed_by_client
    }
}

impl Connector for MockConnector {
    fn connect(&self, _config: &ClientConfig) -> BoxFuture<'static, Result<Link, ClientError>> {
        let outcome = {
            let mut state = self.lock();
            state.connect_calls += 1;
            let fallback = MockOutcome::Accept(state.default_kind.unwrap_or(TransportKind::WebSocket));
            state.script.pop_front().unwrap_or(fallback)
        };
        let mock = self.clone();
        Box::pin(async move {
            match outcome {
                MockOutcome::Accept(kind) => {
                    let mut state = mock.lock();
                    state.drain_outbound();
                    state.links_opened += 1;
                    let (link, handle) = Link::channel(format!("mock-{}", state.links_opened), kind);
                    state.live = Some(handle);
                    Ok(link)
                },
                MockOutcome::Refuse(reason) => Err(ClientError::Connect(reason)),
                MockOutcome::Hang => futures::future::pending().await,
            }
        })
    }
}
