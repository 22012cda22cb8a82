use std::pin::Pin;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};

use gambit_core::net::protocol::{
    EnginePacket, HandshakeInfo, SocketPacket, connect_error_message, connect_sid, decode_payload,
    encode_payload,
};

use super::websocket::{self, WsStream};
use super::{Flow, Link, LinkEvent, LinkHandle, Outbound, TransportKind, engine_url, message_packet, route_packet};
use crate::config::ClientConfig;
use crate::error::ClientError;

fn transport_err(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

async fn get(http: &reqwest::Client, url: &str) -> Result<String, ClientError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(transport_err)?
        .error_for_status()
        .map_err(transport_err)?;
    response.text().await.map_err(transport_err)
}

async fn post(http: &reqwest::Client, url: &str, packets: &[EnginePacket]) -> Result<(), ClientError> {
    let body = encode_payload(packets)?;
    http.post(url)
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(body)
        .send()
        .await
        .map_err(transport_err)?
        .error_for_status()
        .map_err(transport_err)?;
    Ok(())
}

/// Open a session over HTTP long-polling, upgrading to WebSocket later when
/// both sides allow it.
pub(crate) async fn open(http: reqwest::Client, config: &ClientConfig) -> Result<Link, ClientError> {
    let url = engine_url(config, TransportKind::Polling, None);
    let body = get(&http, &url).await.map_err(|e| match e {
        ClientError::Transport(msg) => ClientError::Connect(msg),
        other => other,
    })?;
    let handshake = match decode_payload(&body)?.into_iter().next() {
        Some(EnginePacket::Open(info)) => info,
        other => {
            return Err(ClientError::Connect(format!(
                "expected engine open packet, got {other:?}"
            )));
        },
    };
    tracing::debug!(sid = %handshake.sid, upgrades = ?handshake.upgrades, "Engine open");

    let session_url = engine_url(config, TransportKind::Polling, Some(&handshake.sid));
    post(&http, &session_url, &[message_packet(&SocketPacket::Connect(None))?]).await?;

    let mut backlog = Vec::new();
    let connection_id = loop {
        let mut acked = None;
        for packet in decode_payload(&get(&http, &session_url).await?)? {
            if acked.is_some() {
                backlog.push(packet);
                continue;
            }
            match packet {
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect(ack) => {
                        acked = Some(connect_sid(ack.as_ref()).unwrap_or_else(|| handshake.sid.clone()));
                    },
                    SocketPacket::ConnectError(err) => {
                        return Err(ClientError::Connect(connect_error_message(&err)));
                    },
                    _ => backlog.push(EnginePacket::Message(body)),
                },
                EnginePacket::Ping(data) => post(&http, &session_url, &[EnginePacket::Pong(data)]).await?,
                EnginePacket::Close => {
                    return Err(ClientError::Connect("server closed during handshake".into()));
                },
                _ => {},
            }
        }
        if let Some(id) = acked {
            break id;
        }
    };

    let (link, handle) = Link::channel(connection_id, TransportKind::Polling);
    tokio::spawn(run(http, config.clone(), session_url, handshake, handle, backlog));
    Ok(link)
}

type Polled = Result<Vec<EnginePacket>, ClientError>;

/// Issue back-to-back long-poll requests, forwarding each decoded payload.
/// Stops after the first failure, once the receiver is gone, or before the
/// next request once `stop` fires. A request already in flight when `stop`
/// fires still completes and is forwarded.
async fn poll_loop(
    http: reqwest::Client,
    url: String,
    tx: mpsc::UnboundedSender<Polled>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        if !matches!(stop.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            return;
        }
        let result = match get(&http, &url).await {
            Ok(body) => decode_payload(&body).map_err(ClientError::from),
            Err(e) => Err(e),
        };
        let failed = result.is_err();
        if tx.send(result).is_err() || failed {
            return;
        }
    }
}

async fn handle_packet(
    http: &reqwest::Client,
    url: &str,
    inbound: &mpsc::UnboundedSender<LinkEvent>,
    packet: EnginePacket,
) -> Option<String> {
    match route_packet(packet, inbound) {
        Flow::Continue => None,
        Flow::Reply(reply) => match post(http, url, &[reply]).await {
            Ok(()) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Polling write failed");
                Some("transport error".into())
            },
        },
        Flow::Close(reason) => Some(reason),
    }
}

/// Route whatever the stopped poller still delivers. Returns a close reason
/// if the session ended meanwhile, `None` once the poller has finished.
async fn drain_polls(
    http: &reqwest::Client,
    url: &str,
    inbound: &mpsc::UnboundedSender<LinkEvent>,
    poll_rx: &mut mpsc::UnboundedReceiver<Polled>,
    mut deadline: Pin<&mut Sleep>,
    liveness: Duration,
) -> Option<String> {
    loop {
        tokio::select! {
            polled = poll_rx.recv() => match polled {
                Some(Ok(packets)) => {
                    deadline.as_mut().reset(Instant::now() + liveness);
                    for packet in packets {
                        if let Some(reason) = handle_packet(http, url, inbound, packet).await {
                            return Some(reason);
                        }
                    }
                },
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "Final long-poll failed");
                    return Some("transport error".into());
                },
                None => return None,
            },
            () = &mut deadline => return Some("ping timeout".into()),
        }
    }
}

enum Exit {
    Closed(String),
    Upgraded(WsStream),
}

async fn run(
    http: reqwest::Client,
    config: ClientConfig,
    session_url: String,
    handshake: HandshakeInfo,
    handle: LinkHandle,
    backlog: Vec<EnginePacket>,
) {
    let LinkHandle {
        inbound,
        mut outbound,
    } = handle;
    let liveness = Duration::from_millis(handshake.liveness_window_ms());

    let (poll_tx, mut poll_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel();
    let mut stop_polling = Some(stop_tx);
    let poller = tokio::spawn(poll_loop(http.clone(), session_url.clone(), poll_tx, stop_rx));

    let mut upgrade: Option<BoxFuture<'static, Result<WsStream, ClientError>>> =
        (config.upgrade_possible() && handshake.can_upgrade_to_websocket()).then(|| {
            let sid = handshake.sid.clone();
            async move { websocket::probe(&config, &sid).await }.boxed()
        });

    let deadline = tokio::time::sleep(liveness);
    tokio::pin!(deadline);

    let exit = 'run: {
        for packet in backlog {
            if let Some(reason) = handle_packet(&http, &session_url, &inbound, packet).await {
                break 'run Exit::Closed(reason);
            }
        }

        loop {
            tokio::select! {
                polled = poll_rx.recv() => match polled {
                    Some(Ok(packets)) => {
                        deadline.as_mut().reset(Instant::now() + liveness);
                        for packet in packets {
                            if let Some(reason) = handle_packet(&http, &session_url, &inbound, packet).await {
                                break 'run Exit::Closed(reason);
                            }
                        }
                    },
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "Long-poll failed");
                        break 'run Exit::Closed("transport error".into());
                    },
                    None => break 'run Exit::Closed("transport close".into()),
                },
                out = outbound.recv() => match out {
                    Some(Outbound::Packet(packet)) => match message_packet(&packet) {
                        Ok(frame) => {
                            if let Err(e) = post(&http, &session_url, &[frame]).await {
                                tracing::debug!(error = %e, "Polling write failed");
                                break 'run Exit::Closed("transport error".into());
                            }
                        },
                        Err(e) => tracing::warn!(error = %e, "Dropping unencodable packet"),
                    },
                    Some(Outbound::Close) | None => {
                        let mut farewell = Vec::with_capacity(2);
                        if let Ok(frame) = message_packet(&SocketPacket::Disconnect) {
                            farewell.push(frame);
                        }
                        farewell.push(EnginePacket::Close);
                        let _ = post(&http, &session_url, &farewell).await;
                        break 'run Exit::Closed("io client disconnect".into());
                    },
                },
                probed = async {
                    match upgrade.as_mut() {
                        Some(fut) => fut.await,
                        None => std::future::pending().await,
                    }
                }, if upgrade.is_some() => {
                    upgrade = None;
                    match probed {
                        Ok(ws) => {
                            // The server keeps writing to polling until it sees
                            // the upgrade packet.
                            if let Some(stop) = stop_polling.take() {
                                let _ = stop.send(());
                            }
                            let drained = drain_polls(
                                &http,
                                &session_url,
                                &inbound,
                                &mut poll_rx,
                                deadline.as_mut(),
                                liveness,
                            )
                            .await;
                            break 'run match drained {
                                None => Exit::Upgraded(ws),
                                Some(reason) => Exit::Closed(reason),
                            };
                        },
                        Err(e) => tracing::debug!(error = %e, "Upgrade probe failed, staying on polling"),
                    }
                },
                () = &mut deadline => break 'run Exit::Closed("ping timeout".into()),
            }
        }
    };

    poller.abort();
    match exit {
        Exit::Closed(reason) => {
            tracing::debug!(reason = %reason, "Polling link closed");
            let _ = inbound.send(LinkEvent::Closed { reason });
        },
        Exit::Upgraded(mut ws) => {
            if let Err(e) = websocket::commit_upgrade(&mut ws).await {
                tracing::debug!(error = %e, "Upgrade commit failed");
                let _ = inbound.send(LinkEvent::Closed {
                    reason: "transport error".into(),
                });
                return;
            }
            tracing::info!("Transport upgraded to websocket");
            let _ = inbound.send(LinkEvent::Upgraded(TransportKind::WebSocket));
            websocket::pump(ws, LinkHandle { inbound, outbound }, liveness, Vec::new()).await;
        },
    }
}
