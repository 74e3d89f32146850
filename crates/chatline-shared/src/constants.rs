/// Application name
pub const APP_NAME: &str = "chatline";

/// Path of the live WebSocket endpoint
pub const WS_PATH: &str = "/ws";

/// Query parameter carrying the credential token when headers are unavailable
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Inbound typing state reverts to false after this long without a refresh
pub const TYPING_TIMEOUT_SECS: u64 = 3;

/// Outbound typing state is cleared after this long without a keystroke
pub const TYPING_IDLE_SECS: u64 = 1;

/// Default credential token lifetime (7 days)
pub const TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Maximum message text size in bytes (64 KiB)
pub const MAX_TEXT_BYTES: usize = 64 * 1024;

/// Maximum decoded image payload size in bytes (5 MiB)
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 5001;

/// Server ping cadence on live connections
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// A live connection with no inbound frame for this long is presumed dead
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;
