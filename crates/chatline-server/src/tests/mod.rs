//! End-to-end tests: the real router on a loopback port, driven by
//! tokio-tungstenite live connections and reqwest API calls.

mod api_tests;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use chatline_shared::constants::{TOKEN_QUERY_PARAM, WS_PATH};
use chatline_shared::protocol::SendMessageRequest;
use chatline_shared::token::TokenCodec;
use chatline_shared::{ClientEvent, Message, ServerEvent, UserId, UserProfile};
use chatline_store::MemoryStore;

use crate::api::{serve_on, AppState};
use crate::config::ServerConfig;

pub(crate) type Live = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "e2e-secret";

pub(crate) struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: MemoryStore,
    codec: TokenCodec,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let store = MemoryStore::new();
        for (id, name) in [("alice", "Alice"), ("bob", "Bob"), ("carol", "Carol")] {
            store
                .insert_user(UserProfile {
                    id: UserId::from(id),
                    fullname: name.to_string(),
                    email: format!("{id}@example.com"),
                    profile_pic: String::new(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let config = ServerConfig {
            jwt_secret: SECRET.to_string(),
            ..config
        };
        let state = AppState::new(config, Arc::new(store.clone()), Arc::new(store.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(serve_on(listener, state.clone()));

        Self {
            addr,
            state,
            store,
            codec: TokenCodec::new(SECRET.as_bytes()),
            task,
        }
    }

    pub fn token(&self, user: &str) -> String {
        self.codec.issue(&UserId::from(user)).unwrap()
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn connect(&self, user: &str) -> Live {
        let url = format!(
            "ws://{}{WS_PATH}?{TOKEN_QUERY_PARAM}={}",
            self.addr,
            self.token(user)
        );
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    /// Connect and consume frames up to the broadcast that includes `user`.
    pub async fn connect_online(&self, user: &str) -> Live {
        let mut ws = self.connect(user).await;
        let me = UserId::from(user);
        loop {
            if let ServerEvent::OnlineUsers(users) = next_event(&mut ws).await {
                if users.contains(&me) {
                    return ws;
                }
            }
        }
    }

    pub async fn send(&self, from: &str, to: &str, text: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url(&format!("/api/messages/send/{to}")))
            .bearer_auth(self.token(from))
            .json(&SendMessageRequest::text(text))
            .send()
            .await
            .unwrap()
    }

    pub async fn history(&self, user: &str, with: &str) -> Vec<Message> {
        reqwest::Client::new()
            .get(self.url(&format!("/api/messages/{with}")))
            .bearer_auth(self.token(user))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Wait for the server to finish tearing down closed connections.
    pub async fn wait_for_connections(&self, count: usize) {
        for _ in 0..200 {
            if self.state.presence.connection_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "expected {count} connections, have {}",
            self.state.presence.connection_count()
        );
    }
}

pub(crate) async fn next_event(ws: &mut Live) -> ServerEvent {
    let deadline = Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for a server event")
            .expect("connection closed")
            .unwrap();
        if let WsMessage::Text(text) = frame {
            return ServerEvent::from_json(&text).unwrap();
        }
    }
}

/// Next event that is not a presence broadcast.
pub(crate) async fn next_non_presence(ws: &mut Live) -> ServerEvent {
    loop {
        match next_event(ws).await {
            ServerEvent::OnlineUsers(_) => continue,
            other => return other,
        }
    }
}

/// Collect everything that arrives within `window`.
pub(crate) async fn drain_for(ws: &mut Live, window: Duration) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    let _ = tokio::time::timeout(window, async {
        while let Some(Ok(frame)) = ws.next().await {
            if let WsMessage::Text(text) = frame {
                events.push(ServerEvent::from_json(&text).unwrap());
            }
        }
    })
    .await;
    events
}

pub(crate) async fn emit(ws: &mut Live, event: ClientEvent) {
    ws.send(WsMessage::Text(event.to_json().unwrap()))
        .await
        .unwrap();
}

pub(crate) fn ids(users: &[&str]) -> Vec<UserId> {
    users.iter().map(|u| UserId::from(*u)).collect()
}
