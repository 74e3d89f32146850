//! Live channel endpoint.
//!
//! One task per admitted connection reads frames and dispatches them; a
//! companion writer task drains the connection's outbox onto the socket and
//! sends heartbeat pings. The gate runs before the upgrade is accepted, so a
//! rejected client never gets a socket at all.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chatline_shared::constants::TOKEN_QUERY_PARAM;
use chatline_shared::protocol::{ErrorPayload, PresencePayload};
use chatline_shared::{ClientEvent, MessageStatus, ProtocolError, ServerEvent, UserProfile};

use crate::api::AppState;
use crate::error::ServerError;
use crate::gate::extract_token;
use crate::registry::ConnectionHandle;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(mut params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let token = extract_token(&headers, params.remove(TOKEN_QUERY_PARAM));
    let user = state.gate.admit(token.as_deref()).await?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

async fn handle_socket(socket: WebSocket, user: UserProfile, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let conn = ConnectionHandle::new(user.id.clone(), tx);

    let heartbeat = state.config.heartbeat_interval;
    let conn_id = conn.id;
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        // The first tick completes immediately.
        ping.tick().await;
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(conn = %conn_id, event = event.name(), error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if sink.send(WsMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(conn = %conn_id, "Writer task ended");
    });

    state.presence.connect(&conn);
    info!(user = %user.id, conn = %conn.id, "Live connection admitted");

    let timeout = state.config.heartbeat_timeout;
    loop {
        let frame = match tokio::time::timeout(timeout, stream.next()).await {
            Err(_) => {
                info!(user = %user.id, conn = %conn.id, "Heartbeat timeout, dropping connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(conn = %conn.id, error = %e, "WebSocket transport error");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => handle_frame(&state, &conn, &text).await,
            WsMessage::Binary(_) => {
                reply_error(&conn, &ProtocolError::UnsupportedFrame.to_string());
            }
            WsMessage::Close(_) => break,
            // Pings are answered by the transport; any frame counts as liveness.
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }

    let went_offline = state.presence.disconnect(&conn);
    writer.abort();
    info!(
        user = %user.id,
        conn = %conn.id,
        went_offline,
        "Live connection closed"
    );
}

pub(crate) async fn handle_frame(state: &AppState, conn: &ConnectionHandle, text: &str) {
    if !state.frame_limiter.check(conn.user_id.clone()).await {
        warn!(user = %conn.user_id, conn = %conn.id, "Frame rate exceeded, dropping frame");
        return;
    }

    match ClientEvent::from_json(text) {
        Ok(event) => dispatch(state, conn, event),
        Err(e) => {
            debug!(conn = %conn.id, error = %e, "Malformed client frame");
            reply_error(conn, &e.to_string());
        }
    }
}

/// The per-connection event table: one handler per client event name.
fn dispatch(state: &AppState, conn: &ConnectionHandle, event: ClientEvent) {
    debug!(user = %conn.user_id, event = event.name(), "Client event");
    match event {
        ClientEvent::SetPresence(PresencePayload { online: true }) => {
            state.presence.declare_online(conn);
        }
        ClientEvent::SetPresence(PresencePayload { online: false }) => {
            state.presence.declare_offline(conn);
        }
        ClientEvent::Typing(update) => {
            state
                .interaction
                .relay_typing(&conn.user_id, &update.receiver_id, update.is_typing);
        }
        ClientEvent::Delivered(ack) => {
            state
                .interaction
                .acknowledge(&conn.user_id, ack, MessageStatus::Delivered);
        }
        ClientEvent::Read(ack) => {
            state
                .interaction
                .acknowledge(&conn.user_id, ack, MessageStatus::Read);
        }
    }
}

fn reply_error(conn: &ConnectionHandle, message: &str) {
    conn.push(ServerEvent::Error(ErrorPayload {
        message: message.to_string(),
    }));
}
