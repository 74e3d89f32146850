use thiserror::Error;

/// Credential verification failures.
///
/// These are distinguished for logging only; callers at the connection
/// boundary present every variant as "authentication failed".
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential token")]
    MissingToken,

    #[error("Token verification failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("Token does not name a user")]
    MissingSubject,

    #[error("Token signing failed: {0}")]
    Signing(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported frame type")]
    UnsupportedFrame,
}
