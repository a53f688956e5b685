//! Fixed-window rate limiting.
//!
//! Windows are aligned to wall-clock boundaries (`now / window`). Each key's
//! counter is updated while holding its dashmap shard lock, so concurrent
//! requests from the same key never lose an increment. A counter whose
//! window index is stale is reset by the first request of the new window.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::http::{HeaderName, HeaderValue};
use dashmap::DashMap;

use crate::config::RateLimitConfig;
use crate::error::Error;
use crate::pipeline::{Flow, RequestContext, Stage};

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Millisecond wall clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowCount {
    index: u64,
    hits: u32,
}

/// Result of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes.
    pub reset_after: Duration,
}

/// Per-key request counter over fixed windows.
pub struct FixedWindowLimiter {
    window_ms: u64,
    max: u32,
    clock: Arc<dyn Clock>,
    counts: DashMap<String, WindowCount>,
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("window_ms", &self.window_ms)
            .field("max", &self.max)
            .field("keys", &self.counts.len())
            .finish()
    }
}

impl FixedWindowLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_ms: config.window_secs.max(1).saturating_mul(1000),
            max: config.max_requests,
            clock,
            counts: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Count one request for `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> Decision {
        let now = self.clock.now_millis();
        let index = now / self.window_ms;
        let reset_after = Duration::from_millis(self.window_ms - now % self.window_ms);

        let hits = {
            let mut entry = self
                .counts
                .entry(key.to_string())
                .or_insert(WindowCount { index, hits: 0 });
            if entry.index != index {
                *entry = WindowCount { index, hits: 0 };
            }
            entry.hits = entry.hits.saturating_add(1);
            entry.hits
        };

        Decision {
            allowed: hits <= self.max,
            limit: self.max,
            remaining: self.max.saturating_sub(hits),
            reset_after,
        }
    }

    /// Drop counters from past windows. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let index = self.clock.now_millis() / self.window_ms;
        let before = self.counts.len();
        self.counts.retain(|_, count| count.index == index);
        before - self.counts.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.counts.len()
    }
}

/// Pipeline stage keyed by client IP.
#[derive(Debug)]
pub struct RateLimit {
    limiter: Arc<FixedWindowLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<FixedWindowLimiter>) -> Self {
        Self { limiter }
    }
}

fn client_key(ctx: &RequestContext) -> String {
    ctx.remote_addr
        .or_else(|| {
            ctx.attributes
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0)
        })
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl Stage for RateLimit {
    fn name(&self) -> &str {
        "rate-limiter"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let decision = self.limiter.check(&client_key(ctx));

        ctx.set_response_header(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
        ctx.set_response_header(
            X_RATELIMIT_REMAINING.clone(),
            HeaderValue::from(decision.remaining),
        );

        if decision.allowed {
            Flow::Continue
        } else {
            Flow::Fail(Error::RateLimited {
                retry_after: decision.reset_after,
            })
        }
    }
}
