use chatline_shared::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server refused the credential token.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("No conversation is open")]
    NoConversation,

    #[error("Live connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
