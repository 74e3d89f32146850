use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Path, State},
    http::{request::Parts, HeaderValue, Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use chatline_shared::constants::{APP_NAME, MAX_IMAGE_BYTES, WS_PATH};
use chatline_shared::protocol::SendMessageRequest;
use chatline_shared::token::TokenCodec;
use chatline_shared::{Message, UserId, UserProfile};
use chatline_store::{MessageStore, UserDirectory};

use crate::config::ServerConfig;
use crate::delivery::DeliveryCoordinator;
use crate::error::ServerError;
use crate::gate::{extract_token, ConnectionGate};
use crate::interaction::InteractionRelay;
use crate::presence::Presence;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub presence: Presence,
    pub gate: ConnectionGate,
    pub delivery: DeliveryCoordinator,
    pub interaction: InteractionRelay,
    pub users: Arc<dyn UserDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub rate_limiter: RateLimiter,
    pub frame_limiter: RateLimiter<UserId>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the real-time core to its collaborators.
    pub fn new(
        config: ServerConfig,
        users: Arc<dyn UserDirectory>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let presence = Presence::new();
        let verifier = Arc::new(TokenCodec::new(config.jwt_secret.as_bytes()));
        Self {
            gate: ConnectionGate::new(verifier, users.clone()),
            delivery: DeliveryCoordinator::new(presence.clone(), messages.clone()),
            interaction: InteractionRelay::new(presence.clone(), messages.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst),
            frame_limiter: RateLimiter::new(config.frame_rate_per_sec, config.frame_rate_burst),
            presence,
            users,
            messages,
            config: Arc::new(config),
        }
    }
}

/// The caller of a request/response endpoint, admitted through the same
/// gate as live connections.
pub struct AuthUser(pub UserProfile);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, None);
        let user = state.gate.admit(token.as_deref()).await?;
        Ok(AuthUser(user))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.cors_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Base64 inflates images by a third; leave room for the JSON envelope.
    let body_limit = MAX_IMAGE_BYTES * 4 / 3 + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/presence", get(online_users))
        .route("/api/messages/users", get(list_users))
        .route("/api/messages/:user_id", get(get_messages))
        .route("/api/messages/send/:receiver_id", post(send_message))
        .route(WS_PATH, get(ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.is_empty() {
        return AllowOrigin::from(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    AllowOrigin::list(parsed)
}

#[derive(Serialize)]
struct HealthResponse {
    service: &'static str,
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: APP_NAME,
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn online_users(_caller: AuthUser, State(state): State<AppState>) -> Json<Vec<UserId>> {
    Json(state.presence.list_online())
}

async fn list_users(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserProfile>>, ServerError> {
    let users = state.users.list_users_except(&me.id).await?;
    Ok(Json(users))
}

async fn get_messages(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let counterpart = UserId::new(user_id);
    if counterpart.is_empty() {
        return Err(ServerError::BadRequest("empty user id".into()));
    }
    let messages = state.messages.get_messages(&me.id, &counterpart).await?;
    Ok(Json(messages))
}

async fn send_message(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(receiver_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ServerError> {
    let receiver = UserId::new(receiver_id);
    let message = state.delivery.send(&me.id, &receiver, body).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, state).await
}

pub async fn serve_on(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP API server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chatline_store::Database;
    use chrono::Utc;
    use tower::ServiceExt;

    fn sqlite_state(dir: &tempfile::TempDir) -> (AppState, TokenCodec) {
        let db = Database::open_at(&dir.path().join("chat.db")).unwrap();
        for id in ["alice", "bob"] {
            db.insert_user(&UserProfile {
                id: UserId::from(id),
                fullname: id.to_string(),
                email: format!("{id}@example.com"),
                profile_pic: String::new(),
                created_at: Utc::now(),
            })
            .unwrap();
        }
        let config = ServerConfig {
            jwt_secret: "api-secret".into(),
            ..ServerConfig::default()
        };
        (
            AppState::new(config, Arc::new(db.clone()), Arc::new(db)),
            TokenCodec::new(b"api-secret"),
        )
    }

    #[tokio::test]
    async fn test_send_then_fetch_against_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let (state, codec) = sqlite_state(&dir);
        let app = build_router(state);
        let alice = codec.issue(&UserId::from("alice")).unwrap();
        let bob = codec.issue(&UserId::from("bob")).unwrap();

        let send = Request::builder()
            .method(Method::POST)
            .uri("/api/messages/send/bob")
            .header(header::AUTHORIZATION, format!("Bearer {alice}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"text":"  persisted  "}"#))
            .unwrap();
        let response = app.clone().oneshot(send).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let fetch = Request::builder()
            .uri("/api/messages/alice")
            .header(header::AUTHORIZATION, format!("Bearer {bob}"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(fetch).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let history: Vec<Message> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text.as_deref(), Some("persisted"));
    }

    #[test]
    fn test_allowed_origins_skips_invalid_entries() {
        // Builds without panicking even with a header-invalid origin.
        let _ = allowed_origins(&["http://localhost:5173".into(), "bad\norigin".into()]);
        let _ = allowed_origins(&[]);
    }
}
