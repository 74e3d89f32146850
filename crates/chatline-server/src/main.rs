//! # chatline-server
//!
//! Real-time presence and delivery server for chatline.
//!
//! This binary provides:
//! - **Connection gate** that authenticates every live connection and API
//!   call against the auth service's token and user store
//! - **Presence registry and broadcaster** tracking which users are online
//!   and pushing the full online set to every connection on change
//! - **Ephemeral relay** for typing indicators and delivered/read receipts
//! - **Message delivery** that persists each message and pushes it to the
//!   receiver's live connection
//! - **REST API** (axum) for history, the user list and sending messages
//! - **Per-IP and per-user rate limiting** to protect against abuse

mod api;
mod config;
mod delivery;
mod error;
mod gate;
mod interaction;
mod presence;
mod rate_limit;
mod registry;
mod ws;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatline_store::{Database, MemoryStore, MessageStore, UserDirectory};

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chatline_server=debug")),
        )
        .init();

    info!("Starting chatline server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the user and message stores
    // -----------------------------------------------------------------------
    let (users, messages): (Arc<dyn UserDirectory>, Arc<dyn MessageStore>) =
        match &config.database_path {
            Some(path) => {
                let db = Database::open_at(path)?;
                (Arc::new(db.clone()), Arc::new(db))
            }
            None => {
                info!("DATABASE_PATH not set, using an empty in-memory store");
                let store = MemoryStore::new();
                (Arc::new(store.clone()), Arc::new(store))
            }
        };

    let http_addr = config.http_addr;
    let app_state = AppState::new(config, users, messages);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let ip_limiter = app_state.rate_limiter.clone();
    let frame_limiter = app_state.frame_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            ip_limiter.purge_stale(600.0).await;
            frame_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP and WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
