//! Types shared by the chatline server, store and client crates.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::{AuthError, ProtocolError};
pub use protocol::{ClientEvent, Message, MessageStatus, ServerEvent};
pub use types::{ConnectionId, MessageId, UserId, UserProfile};
