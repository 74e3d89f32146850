//! Live connection driver.
//!
//! Opens the authenticated WebSocket and splits it into two tasks: one
//! writes queued [`ClientEvent`]s, the other decodes server frames into
//! [`LiveUpdate`]s. Reconnecting is up to the owner: a new session goes
//! through the gate again and counts as a fresh online declaration.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};

use chatline_shared::protocol::PresencePayload;
use chatline_shared::{ClientEvent, ServerEvent};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUpdate {
    Event(ServerEvent),
    Disconnected,
}

pub struct LiveSession {
    outbound: mpsc::UnboundedSender<ClientEvent>,
    updates: mpsc::UnboundedReceiver<LiveUpdate>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LiveSession {
    pub async fn connect(config: &ClientConfig, token: &str) -> Result<Self> {
        let mut request = config.ws_url()?.into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ClientError::AuthenticationFailed)?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (ws, _) = match tokio_tungstenite::connect_async(request).await {
            Ok(pair) => pair,
            Err(WsError::Http(response)) if response.status().as_u16() == 401 => {
                return Err(ClientError::AuthenticationFailed);
            }
            Err(e) => return Err(e.into()),
        };
        info!("Live connection established");

        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (updates_tx, updates) = mpsc::unbounded_channel::<LiveUpdate>();

        let writer = tokio::spawn(async move {
            while let Some(event) = outbound_rx.recv().await {
                let json = match event.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(event = event.name(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            debug!("Live writer ended");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(error = %e, "Live transport error");
                        break;
                    }
                };
                match ServerEvent::from_json(&text) {
                    Ok(event) => {
                        if updates_tx.send(LiveUpdate::Event(event)).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "Ignoring undecodable server frame"),
                }
            }
            info!("Live connection closed");
            let _ = updates_tx.send(LiveUpdate::Disconnected);
        });

        Ok(Self {
            outbound,
            updates,
            reader,
            writer,
        })
    }

    /// A sender for queueing frames, for owners that outlive a borrow.
    pub fn outbound(&self) -> mpsc::UnboundedSender<ClientEvent> {
        self.outbound.clone()
    }

    pub fn send(&self, event: ClientEvent) -> Result<()> {
        self.outbound.send(event).map_err(|_| ClientError::Closed)
    }

    pub fn set_presence(&self, online: bool) -> Result<()> {
        self.send(ClientEvent::SetPresence(PresencePayload { online }))
    }

    /// Next update, or `None` once the session has been fully drained.
    pub async fn next_update(&mut self) -> Option<LiveUpdate> {
        self.updates.recv().await
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_shared::protocol::TypingUpdate;
    use chatline_shared::UserId;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http::StatusCode;

    /// A one-connection server that requires `Bearer good`, greets with an
    /// online set and then echoes the first client frame back as text.
    async fn fake_server() -> (ClientConfig, JoinHandle<Option<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let check = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                let authorized = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer good");
                if authorized {
                    Ok(resp)
                } else {
                    let mut rejection = ErrorResponse::new(None);
                    *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(rejection)
                }
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, check).await.ok()?;
            let hello = ServerEvent::OnlineUsers(vec![UserId::from("alice")]);
            ws.send(WsMessage::Text(hello.to_json().unwrap())).await.unwrap();
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => Some(text),
                _ => None,
            }
        });
        (ClientConfig::new(format!("http://{addr}")), task)
    }

    #[tokio::test]
    async fn test_session_exchanges_frames() {
        let (config, server) = fake_server().await;
        let mut session = LiveSession::connect(&config, "good").await.unwrap();

        assert_eq!(
            session.next_update().await,
            Some(LiveUpdate::Event(ServerEvent::OnlineUsers(vec![UserId::from("alice")])))
        );

        let typing = ClientEvent::Typing(TypingUpdate {
            receiver_id: UserId::from("bob"),
            is_typing: true,
        });
        session.send(typing.clone()).unwrap();
        let received = server.await.unwrap().unwrap();
        assert_eq!(ClientEvent::from_json(&received).unwrap(), typing);

        // The server task ended, dropping its socket.
        assert_eq!(session.next_update().await, Some(LiveUpdate::Disconnected));
    }

    #[tokio::test]
    async fn test_rejected_token() {
        let (config, _server) = fake_server().await;
        assert!(matches!(
            LiveSession::connect(&config, "bad").await,
            Err(ClientError::AuthenticationFailed)
        ));
    }
}
