use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use chatline_store::StoreError;

use crate::gate::GateError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Every gate rejection collapses into this one variant so the caller
    /// cannot tell a bad signature from an unknown user.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("too many requests")]
    RateLimited,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GateError> for ServerError {
    fn from(_: GateError) -> Self {
        ServerError::AuthenticationFailed
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::AuthenticationFailed => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::Store(e) if e.is_validation() => (StatusCode::BAD_REQUEST, e.to_string()),
            ServerError::Store(e) => {
                tracing::error!(error = %e, "Store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
    }
}
