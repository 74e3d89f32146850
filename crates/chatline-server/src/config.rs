//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;

use chatline_shared::constants::{DEFAULT_HTTP_PORT, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS};

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5001`
    pub http_addr: SocketAddr,

    /// HMAC secret shared with the auth service that issues tokens.
    /// Env: `JWT_SECRET`
    /// Default: random per process (tokens do not survive a restart).
    pub jwt_secret: String,

    /// SQLite database file. Unset keeps everything in memory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Allowed CORS origins, comma separated. Empty allows any origin.
    /// Env: `CORS_ORIGINS`
    pub cors_origins: Vec<String>,

    /// Env: `HEARTBEAT_INTERVAL_SECS`
    pub heartbeat_interval: Duration,

    /// Env: `HEARTBEAT_TIMEOUT_SECS`
    pub heartbeat_timeout: Duration,

    /// Sustained HTTP requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,

    /// Sustained live-channel frames per second per user.
    /// Env: `FRAME_RATE_PER_SEC`
    pub frame_rate_per_sec: f64,

    /// Env: `FRAME_RATE_BURST`
    pub frame_rate_burst: f64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("jwt_secret", &"<redacted>")
            .field("database_path", &self.database_path)
            .field("cors_origins", &self.cors_origins)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("frame_rate_per_sec", &self.frame_rate_per_sec)
            .field("frame_rate_burst", &self.frame_rate_burst)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            jwt_secret: random_secret(),
            database_path: None,
            cors_origins: Vec::new(),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            frame_rate_per_sec: 20.0,
            frame_rate_burst: 40.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        match var("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => config.jwt_secret = secret,
            None => tracing::warn!(
                "JWT_SECRET not set, using a random secret (dev only, tokens from the auth service will be rejected)"
            ),
        }

        if let Some(path) = var("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(origins) = var("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(interval) = parse_period(&var, "HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat_interval = interval;
        }
        if let Some(timeout) = parse_period(&var, "HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat_timeout = timeout;
        }
        if config.heartbeat_timeout <= config.heartbeat_interval {
            tracing::warn!(
                interval = ?config.heartbeat_interval,
                timeout = ?config.heartbeat_timeout,
                "Heartbeat timeout not above interval, live connections will be dropped between pings"
            );
        }

        if let Some(n) = parse_number::<f64>(&var, "RATE_LIMIT_PER_SEC") {
            config.rate_limit_per_sec = n;
        }
        if let Some(n) = parse_number::<f64>(&var, "RATE_LIMIT_BURST") {
            config.rate_limit_burst = n;
        }
        if let Some(n) = parse_number::<f64>(&var, "FRAME_RATE_PER_SEC") {
            config.frame_rate_per_sec = n;
        }
        if let Some(n) = parse_number::<f64>(&var, "FRAME_RATE_BURST") {
            config.frame_rate_burst = n;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

fn parse_number<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}

/// Whole seconds, strictly positive. Ping timers cannot tick at zero.
fn parse_period(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    match parse_number::<u64>(var, key)? {
        0 => {
            tracing::warn!(key, "Period must be at least one second, using default");
            None
        }
        secs => Some(Duration::from_secs(secs)),
    }
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}
