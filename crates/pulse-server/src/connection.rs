use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};

use pulse_core::ServerMessage;
use pulse_hub::{BroadcastHub, CommandGateway, Session};

use crate::handlers;

/// Drive one WebSocket connection: split into writer/reader, issue the
/// session token, pump the session's outbound queue, and dispatch inbound
/// frames. When either side dies the session is detached (resumable), not
/// destroyed.
pub async fn serve_socket(
    socket: WebSocket,
    session: Arc<Session>,
    hub: Arc<BroadcastHub>,
    gateway: Arc<CommandGateway>,
    ping_interval: Duration,
) {
    // First frame out: the resume token for this session.
    session.queue.push(ServerMessage::SessionToken {
        value: session.resume_token.clone(),
    });

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drain the outbound queue, ping on an interval.
    let writer_session = Arc::clone(&session);
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                frame = writer_session.queue.pop() => {
                    let Some(message) = frame else { break };
                    let Ok(json) = serde_json::to_string(&message) else { continue };
                    if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: parse and dispatch; pongs count as liveness.
    let reader_session = Arc::clone(&session);
    let reader_hub = Arc::clone(&hub);
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                WsMessage::Text(text) => {
                    handlers::handle_text(&reader_hub, &gateway, &reader_session, text.as_str());
                }
                WsMessage::Pong(_) => {
                    let _ = reader_hub.heartbeat(&reader_session.id);
                }
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs itself
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    hub.detach_session(&session.id);
    tracing::info!(session_id = %session.id, "websocket closed");
}
