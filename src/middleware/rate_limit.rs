//! In-memory token-bucket rate limiting for the public auth routes.
//!
//! Each client key owns a bucket of `capacity` tokens refilled continuously
//! at `refill_per_sec`. A request spends one token; an empty bucket answers
//! 429.
//!
//! The key is the peer IP. The first `X-Forwarded-For` hop is used instead
//! only when the limiter is told to trust it (behind a reverse proxy).
//!
//! At most `max_clients` buckets are tracked. When a new client arrives at
//! the limit, buckets that have refilled completely are dropped; if none
//! can be dropped the newcomer shares a single overflow bucket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppError;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refilled(&self, now: Instant, refill_per_sec: f64) -> f64 {
        self.tokens + now.duration_since(self.last_refill).as_secs_f64() * refill_per_sec
    }
}

/// Bucket shared by every client that arrives while the map is full.
const OVERFLOW_KEY: &str = "overflow";

const DEFAULT_MAX_CLIENTS: usize = 10_000;

#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    capacity: f64,
    refill_per_sec: f64,
    max_clients: usize,
    trust_forwarded_for: bool,
}

impl RateLimiter {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            capacity: capacity.max(1.0),
            refill_per_sec: refill_per_sec.max(0.0),
            max_clients: DEFAULT_MAX_CLIENTS,
            trust_forwarded_for: false,
        }
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients.max(1);
        self
    }

    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Spend a token for `key`. Returns `false` when the bucket is empty.
    pub async fn allow(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        let mut key = key;
        if !buckets.contains_key(key) && buckets.len() >= self.max_clients {
            let (capacity, refill) = (self.capacity, self.refill_per_sec);
            buckets.retain(|_, bucket| bucket.refilled(now, refill) < capacity);
            if buckets.len() >= self.max_clients {
                tracing::debug!(client = %key, "rate limiter full, using overflow bucket");
                key = OVERFLOW_KEY;
            }
        }

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        bucket.tokens = bucket.refilled(now, self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Forget every bucket. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut buckets = self.buckets.lock().await;
        let cleared = buckets.len();
        buckets.clear();
        cleared
    }

    /// Number of tracked client keys.
    pub async fn len(&self) -> usize {
        self.buckets.lock().await.len()
    }
}

fn client_key(request: &Request, trust_forwarded_for: bool) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .filter(|_| trust_forwarded_for)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(&request, limiter.trust_forwarded_for);
    if !limiter.allow(&key).await {
        tracing::warn!(client = %key, path = %request.uri().path(), "rate limit exceeded");
        return Err(AppError::RateLimited);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[tokio::test]
    async fn bucket_empties_after_capacity() {
        let limiter = RateLimiter::new(3.0, 0.0);
        for _ in 0..3 {
            assert!(limiter.allow("10.0.0.1").await);
        }
        assert!(!limiter.allow("10.0.0.1").await);
        assert!(limiter.allow("10.0.0.2").await);
        assert_eq!(limiter.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_over_time() {
        let limiter = RateLimiter::new(1.0, 1.0);
        assert!(limiter.allow("k").await);
        assert!(!limiter.allow("k").await);

        tokio::time::advance(std::time::Duration::from_millis(1100)).await;
        assert!(limiter.allow("k").await);
    }

    #[tokio::test]
    async fn clear_resets_every_client() {
        let limiter = RateLimiter::new(1.0, 0.0);
        assert!(limiter.allow("k").await);
        assert!(!limiter.allow("k").await);

        assert_eq!(limiter.clear().await, 1);
        assert_eq!(limiter.len().await, 0);
        assert!(limiter.allow("k").await);
    }

    #[tokio::test]
    async fn tracked_clients_are_bounded() {
        let limiter = RateLimiter::new(2.0, 0.0).with_max_clients(3);
        for i in 0..3 {
            assert!(limiter.allow(&format!("10.0.0.{i}")).await);
        }

        // Newcomers beyond the limit share one bucket.
        assert!(limiter.allow("203.0.113.1").await);
        assert!(limiter.allow("203.0.113.2").await);
        assert!(!limiter.allow("203.0.113.3").await);

        for i in 0..1000 {
            limiter.allow(&format!("198.51.100.{i}")).await;
        }
        assert_eq!(limiter.len().await, 4);

        // Known clients keep their own bucket.
        assert!(limiter.allow("10.0.0.0").await);
    }

    #[tokio::test(start_paused = true)]
    async fn refilled_buckets_make_room_for_new_clients() {
        let limiter = RateLimiter::new(1.0, 1.0).with_max_clients(2);
        assert!(limiter.allow("a").await);
        assert!(limiter.allow("b").await);

        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert!(limiter.allow("c").await);
        assert_eq!(limiter.len().await, 1);
        assert!(!limiter.allow("c").await);
    }

    #[test]
    fn forwarded_header_ignored_unless_trusted() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        assert_eq!(client_key(&request, false), "127.0.0.1");
        assert_eq!(client_key(&request, true), "203.0.113.7");
    }

    #[test]
    fn forwarded_header_wins_over_peer_address() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 5000))));
        assert_eq!(client_key(&request, true), "203.0.113.7");

        request.headers_mut().remove("x-forwarded-for");
        assert_eq!(client_key(&request, true), "127.0.0.1");
    }
}
