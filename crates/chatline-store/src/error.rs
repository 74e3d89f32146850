use chatline_shared::protocol::ContentError;
use chatline_shared::UserId;
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The message payload failed validation.
    #[error("Invalid message: {0}")]
    InvalidContent(#[from] ContentError),

    /// A message named a user the directory does not know.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// A user with the same email is already registered.
    #[error("Duplicate user: {0}")]
    DuplicateUser(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// The connection mutex was poisoned by a panicking holder.
    #[error("Database lock poisoned")]
    Poisoned,

    /// A blocking database task failed to complete.
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Whether the failure is the caller's fault rather than the store's.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidContent(_) | StoreError::UnknownUser(_) | StoreError::DuplicateUser(_)
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
