//! # chatline-client
//!
//! Client side of the chatline real-time core: the synchronization store
//! the UI renders from, the HTTP API client, the live-connection driver and
//! the outbound typing debouncer.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod live;
pub mod state;
pub mod typing;

pub use api::{ChatApi, HttpApi};
pub use client::{ChatClient, HistoryOutcome, HistoryRequest, SendOutcome, SendRequest};
pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{Effect, Notification};
pub use live::{LiveSession, LiveUpdate};
pub use state::{Entry, LoadTicket, PendingId, Phase, SyncStore};
pub use typing::TypingDebouncer;
