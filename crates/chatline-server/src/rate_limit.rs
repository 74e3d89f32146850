//! Token-bucket throttling, keyed by client address on the HTTP surface
//! (the WebSocket handshake included) and by user on live-channel frames.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::ServerError;

/// Refill rate and ceiling shared by every bucket of one limiter.
#[derive(Debug, Clone, Copy)]
struct Quota {
    per_sec: f64,
    burst: f64,
}

#[derive(Debug)]
struct Bucket {
    allowance: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn full(quota: Quota, now: Instant) -> Self {
        Self {
            allowance: quota.burst,
            refilled_at: now,
        }
    }

    fn take(&mut self, quota: Quota, now: Instant) -> bool {
        let earned = now.saturating_duration_since(self.refilled_at).as_secs_f64() * quota.per_sec;
        self.allowance = (self.allowance + earned).min(quota.burst);
        self.refilled_at = now;

        if self.allowance < 1.0 {
            return false;
        }
        self.allowance -= 1.0;
        true
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.refilled_at)
    }
}

#[derive(Clone)]
pub struct RateLimiter<K = IpAddr> {
    quota: Quota,
    buckets: Arc<Mutex<HashMap<K, Bucket>>>,
}

impl<K: Eq + Hash> RateLimiter<K> {
    /// `per_sec` tokens are earned back each second, up to `burst`.
    pub fn new(per_sec: f64, burst: f64) -> Self {
        Self {
            quota: Quota { per_sec, burst },
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spend one token for `key`. Unknown keys start with a full bucket.
    pub async fn check(&self, key: K) -> bool {
        let now = Instant::now();
        let quota = self.quota;
        self.buckets
            .lock()
            .await
            .entry(key)
            .or_insert_with(|| Bucket::full(quota, now))
            .take(quota, now)
    }

    /// Forget keys that have not been seen for `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let now = Instant::now();
        let max_idle = Duration::from_secs_f64(max_idle_secs.max(0.0));
        self.buckets
            .lock()
            .await
            .retain(|_, bucket| bucket.idle_for(now) < max_idle);
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

impl<K: Eq + Hash> Default for RateLimiter<K> {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

/// Requests whose address cannot be determined pass through unthrottled.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(ip) = extract_client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(ip = %ip, path = %req.uri().path(), "Rate limit exceeded");
            return Err(ServerError::RateLimited);
        }
    }
    Ok(next.run(req).await)
}

/// Peer address first, then the first `X-Forwarded-For` hop, then `X-Real-IP`.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(peer.ip());
    }
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    header("x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .and_then(|hop| hop.trim().parse().ok())
        .or_else(|| header("x-real-ip").and_then(|v| v.trim().parse().ok()))
}
