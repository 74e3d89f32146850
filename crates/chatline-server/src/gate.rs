//! Connection gate.
//!
//! Resolves a credential token to an existing user before any live
//! connection or authenticated request is admitted. Rejection reasons are
//! kept apart for logging, but callers only ever see
//! [`ServerError::AuthenticationFailed`](crate::error::ServerError).

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use thiserror::Error;
use tracing::{debug, error, warn};

use chatline_shared::token::TokenCodec;
use chatline_shared::{AuthError, UserId, UserProfile};
use chatline_store::{StoreError, UserDirectory};

/// Credential verification, normally backed by the auth service's signing key.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<UserId, AuthError>;
}

#[async_trait]
impl CredentialVerifier for TokenCodec {
    async fn verify_token(&self, token: &str) -> Result<UserId, AuthError> {
        self.verify(token)
    }
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error("no credential token presented")]
    MissingToken,

    #[error("credential rejected: {0}")]
    Credential(#[from] AuthError),

    #[error("token names unknown user {0}")]
    UnknownUser(UserId),

    #[error("user lookup failed: {0}")]
    Directory(#[from] StoreError),
}

#[derive(Clone)]
pub struct ConnectionGate {
    verifier: Arc<dyn CredentialVerifier>,
    users: Arc<dyn UserDirectory>,
}

impl ConnectionGate {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, users: Arc<dyn UserDirectory>) -> Self {
        Self { verifier, users }
    }

    /// Admit or reject. Never touches presence state.
    pub async fn admit(&self, token: Option<&str>) -> Result<UserProfile, GateError> {
        let result = self.resolve(token).await;
        match &result {
            Ok(user) => debug!(user = %user.id, "Credential accepted"),
            Err(GateError::Directory(e)) => error!(error = %e, "Rejecting connection: user lookup failed"),
            Err(e) => warn!(reason = %e, "Rejecting connection"),
        }
        result
    }

    async fn resolve(&self, token: Option<&str>) -> Result<UserProfile, GateError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GateError::MissingToken)?;

        let user_id = self.verifier.verify_token(token).await?;

        self.users
            .get_user_by_id(&user_id)
            .await?
            .ok_or(GateError::UnknownUser(user_id))
    }
}

/// Pull the token from `Authorization: Bearer`, falling back to the query
/// string for clients that cannot set handshake headers.
pub fn extract_token(headers: &HeaderMap, query_token: Option<String>) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or(query_token)
}
