//! # chatline-store
//!
//! The user store and message store that the real-time core consumes.
//!
//! Both are expressed as object-safe async traits ([`UserDirectory`],
//! [`MessageStore`]) so the server can run against any backing service.
//! Two implementations ship here: [`MemoryStore`] for development and tests,
//! and [`Database`], a SQLite store shared with the auth service.

pub mod database;
pub mod memory;
pub mod messages;
pub mod migrations;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use messages::MessageStore;
pub use users::UserDirectory;
