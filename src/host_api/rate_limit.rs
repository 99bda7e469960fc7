use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

use super::middleware::RequestId;

/// Counters are pruned once the table grows past this many callers.
const PRUNE_THRESHOLD: usize = 10_000;

/// Per-caller fixed-window rate limiter.
///
/// Each caller gets `max_requests` per `window`. When exceeded, requests are
/// rejected with 429 Too Many Requests until the window resets.
///
/// Runs in front of every route, before authentication, so callers are keyed
/// by network address rather than identity.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    counters: Mutex<Counters>,
    max_requests: u64,
    window: Duration,
    prune_threshold: usize,
}

#[derive(Default)]
struct Counters {
    by_caller: HashMap<String, WindowCounter>,
    /// Expired windows are swept at most once per window length.
    last_pruned: Option<Instant>,
}

struct WindowCounter {
    count: u64,
    window_start: Instant,
}

impl RateLimiter {
    /// Create a rate limiter allowing `max_requests` per `window` per caller.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self::with_prune_threshold(max_requests, window, PRUNE_THRESHOLD)
    }

    fn with_prune_threshold(max_requests: u64, window: Duration, prune_threshold: usize) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                counters: Mutex::new(Counters::default()),
                max_requests,
                window,
                prune_threshold,
            }),
        }
    }

    /// Count a request from `key`. `Err` carries the time left in the
    /// current window.
    pub fn check(&self, key: &str) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), Duration> {
        let mut counters = self.inner.counters.lock().unwrap_or_else(|e| e.into_inner());
        let window = self.inner.window;

        let prune_due = counters
            .last_pruned
            .map_or(true, |at| now.saturating_duration_since(at) >= window);
        if counters.by_caller.len() > self.inner.prune_threshold && prune_due {
            counters
                .by_caller
                .retain(|_, c| now.saturating_duration_since(c.window_start) < window);
            counters.last_pruned = Some(now);
        }

        let counter = counters.by_caller.entry(key.to_string()).or_insert(WindowCounter {
            count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.saturating_duration_since(counter.window_start) >= window {
            counter.count = 0;
            counter.window_start = now;
        }

        counter.count += 1;
        if counter.count <= self.inner.max_requests {
            Ok(())
        } else {
            Err(window.saturating_sub(now.saturating_duration_since(counter.window_start)))
        }
    }
}

/// Caller key: peer IP, else the first `x-forwarded-for` hop.
fn caller_key(peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
    if let Some(addr) = peer {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Axum middleware that enforces the per-caller budget.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request_id: RequestId,
    req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = caller_key(peer, req.headers());

    if let Err(remaining) = limiter.check(&key) {
        // Round up so a client that waits `retry-after` seconds lands in the next window.
        let retry_after_secs = remaining.as_millis().div_ceil(1000).max(1) as u64;
        tracing::warn!(caller = %key, retry_after_secs, "Rate limited");
        return ApiError::RateLimited { retry_after_secs }
            .for_request(&request_id)
            .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_limit_is_allowed() {
        let limiter = RateLimiter::new(5, Duration::from_secs(1));
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());
    }

    #[test]
    fn over_limit_is_blocked() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("10.0.0.1", now).is_ok()); // 1
        assert!(limiter.check_at("10.0.0.1", now).is_ok()); // 2
        assert!(limiter.check_at("10.0.0.1", now).is_ok()); // 3 (at limit)
        let remaining = limiter
            .check_at("10.0.0.1", now + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(remaining, Duration::from_secs(40));
    }

    #[test]
    fn callers_have_independent_counters() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("a").is_err());

        assert!(limiter.check("b").is_ok()); // independent
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("b").is_err());
    }

    #[test]
    fn window_resets_after_duration() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("a", start).is_ok());
        assert!(limiter.check_at("a", start).is_ok());
        assert!(limiter.check_at("a", start).is_err());

        let later = start + Duration::from_secs(61);
        assert!(limiter.check_at("a", later).is_ok()); // window reset
        assert!(limiter.check_at("a", later).is_ok());
        assert!(limiter.check_at("a", later).is_err());
    }

    fn tracked(limiter: &RateLimiter) -> usize {
        limiter.inner.counters.lock().unwrap().by_caller.len()
    }

    #[test]
    fn expired_windows_are_pruned_at_most_once_per_window() {
        let window = Duration::from_secs(60);
        let limiter = RateLimiter::with_prune_threshold(5, window, 2);
        let t0 = Instant::now();

        for key in ["a", "b", "c"] {
            limiter.check_at(key, t0).unwrap();
        }
        assert_eq!(tracked(&limiter), 3);

        // Over the threshold with every window expired: swept, then "d" added.
        let t1 = t0 + Duration::from_secs(61);
        limiter.check_at("d", t1).unwrap();
        assert_eq!(tracked(&limiter), 1);

        // Still over the threshold, but a sweep already ran this window.
        let t2 = t1 + Duration::from_secs(1);
        for key in ["e", "f", "g", "h"] {
            limiter.check_at(key, t2).unwrap();
        }
        assert_eq!(tracked(&limiter), 5);

        // One window after the last sweep everything old goes again.
        let t3 = t1 + window + Duration::from_secs(2);
        limiter.check_at("i", t3).unwrap();
        assert_eq!(tracked(&limiter), 1);
    }

    #[test]
    fn caller_key_prefers_peer_then_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());

        let peer: SocketAddr = "192.0.2.4:5555".parse().unwrap();
        assert_eq!(caller_key(Some(peer), &headers), "192.0.2.4");
        assert_eq!(caller_key(None, &headers), "203.0.113.9");
        assert_eq!(caller_key(None, &HeaderMap::new()), "unknown");
    }
}
