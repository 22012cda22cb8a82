use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use gambit_core::net::protocol::{
    EnginePacket, SocketPacket, UPGRADE_PROBE, connect_error_message, connect_sid,
};

use super::{Flow, Link, LinkEvent, LinkHandle, Outbound, TransportKind, engine_url, message_packet, route_packet};
use crate::config::ClientConfig;
use crate::error::ClientError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

async fn dial(url: &str) -> Result<WsStream, ClientError> {
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| ClientError::Connect(format!("WebSocket connect to {url} failed: {e}")))?;
    Ok(stream)
}

/// Next engine packet during a handshake; control frames are skipped.
async fn read_packet(ws: &mut WsStream) -> Result<EnginePacket, ClientError> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(EnginePacket::decode(text.as_str())?),
            Some(Ok(Message::Close(_))) | None => {
                return Err(ClientError::Connect("server closed during handshake".into()));
            },
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
        }
    }
}

async fn write_packet(ws: &mut WsStream, packet: &EnginePacket) -> Result<(), ClientError> {
    ws.send(Message::Text(packet.encode()?.into()))
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}

/// Open a session directly over WebSocket.
pub(crate) async fn open(config: &ClientConfig) -> Result<Link, ClientError> {
    let url = engine_url(config, TransportKind::WebSocket, None);
    let mut ws = dial(&url).await?;

    let handshake = loop {
        match read_packet(&mut ws).await? {
            EnginePacket::Open(info) => break info,
            other => tracing::trace!(packet = ?other, "Skipping packet before open"),
        }
    };
    tracing::debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine open");

    write_packet(&mut ws, &message_packet(&SocketPacket::Connect(None))?).await?;

    let mut backlog = Vec::new();
    let connection_id = loop {
        match read_packet(&mut ws).await? {
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                SocketPacket::Connect(ack) => {
                    break connect_sid(ack.as_ref()).unwrap_or_else(|| handshake.sid.clone());
                },
                SocketPacket::ConnectError(err) => {
                    return Err(ClientError::Connect(connect_error_message(&err)));
                },
                _ => backlog.push(EnginePacket::Message(body)),
            },
            EnginePacket::Ping(data) => write_packet(&mut ws, &EnginePacket::Pong(data)).await?,
            EnginePacket::Close => {
                return Err(ClientError::Connect("server closed during handshake".into()));
            },
            _ => {},
        }
    };

    let (link, handle) = Link::channel(connection_id, TransportKind::WebSocket);
    let liveness = Duration::from_millis(handshake.liveness_window_ms());
    tokio::spawn(pump(ws, handle, liveness, backlog));
    Ok(link)
}

/// Open a WebSocket bound to polling session `sid` and complete the probe
/// exchange. The caller stops polling and then sends the `upgrade` packet.
pub(crate) async fn probe(config: &ClientConfig, sid: &str) -> Result<WsStream, ClientError> {
    let url = engine_url(config, TransportKind::WebSocket, Some(sid));
    let mut ws = dial(&url).await?;
    write_packet(&mut ws, &EnginePacket::Ping(UPGRADE_PROBE.into())).await?;
    match read_packet(&mut ws).await? {
        EnginePacket::Pong(data) if data == UPGRADE_PROBE => Ok(ws),
        other => Err(ClientError::Transport(format!("unexpected probe reply: {other:?}"))),
    }
}

/// Finish an upgrade on a probed socket.
pub(crate) async fn commit_upgrade(ws: &mut WsStream) -> Result<(), ClientError> {
    write_packet(ws, &EnginePacket::Upgrade).await
}

async fn send(sink: &mut WsSink, packet: &EnginePacket) -> Result<(), String> {
    let frame = packet.encode().map_err(|e| e.to_string())?;
    sink.send(Message::Text(frame.into()))
        .await
        .map_err(|e| e.to_string())
}

/// Drive an established WebSocket until either side closes it or the
/// server goes quiet for longer than `liveness`.
pub(crate) async fn pump(
    ws: WsStream,
    handle: LinkHandle,
    liveness: Duration,
    backlog: Vec<EnginePacket>,
) {
    let LinkHandle {
        inbound,
        mut outbound,
    } = handle;
    let (mut sink, mut stream) = ws.split();

    let reason: String = 'run: {
        for packet in backlog {
            match route_packet(packet, &inbound) {
                Flow::Continue => {},
                Flow::Reply(reply) => {
                    if let Err(e) = send(&mut sink, &reply).await {
                        tracing::debug!(error = %e, "WebSocket write failed");
                        break 'run "transport error".into();
                    }
                },
                Flow::Close(reason) => break 'run reason,
            }
        }

        let deadline = tokio::time::sleep(liveness);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => break 'run "transport close".into(),
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::debug!(error = %e, "WebSocket read failed");
                            break 'run "transport error".into();
                        },
                    };
                    deadline.as_mut().reset(Instant::now() + liveness);
                    let packet = match EnginePacket::decode(text.as_str()) {
                        Ok(packet) => packet,
                        Err(e) => {
                            tracing::warn!(error = %e, "Dropping malformed engine frame");
                            continue;
                        },
                    };
                    match route_packet(packet, &inbound) {
                        Flow::Continue => {},
                        Flow::Reply(reply) => {
                            if let Err(e) = send(&mut sink, &reply).await {
                                tracing::debug!(error = %e, "WebSocket write failed");
                                break 'run "transport error".into();
                            }
                        },
                        Flow::Close(reason) => break 'run reason,
                    }
                }
                out = outbound.recv() => match out {
                    Some(Outbound::Packet(packet)) => {
                        let frame = match message_packet(&packet) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping unencodable packet");
                                continue;
                            },
                        };
                        if let Err(e) = send(&mut sink, &frame).await {
                            tracing::debug!(error = %e, "WebSocket write failed");
                            break 'run "transport error".into();
                        }
                    },
                    Some(Outbound::Close) | None => {
                        if let Ok(frame) = message_packet(&SocketPacket::Disconnect) {
                            let _ = send(&mut sink, &frame).await;
                        }
                        let _ = sink.send(Message::Close(None)).await;
                        break 'run "io client disconnect".into();
                    },
                },
                () = &mut deadline => break 'run "ping timeout".into(),
            }
        }
    };

    tracing::debug!(reason = %reason, "WebSocket link closed");
    let _ = inbound.send(LinkEvent::Closed { reason });
}
