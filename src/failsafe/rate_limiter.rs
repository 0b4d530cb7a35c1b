//! Per-client fixed-window rate limiting
//!
//! Each client key owns a window that starts with its first request. The
//! count resets once `now - started >= window`. Bursts that straddle a window
//! boundary are accepted; this is a fixed window, not a sliding one.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::RateLimitConfig;

/// Sweep stale windows every this many checks
const SWEEP_EVERY: u64 = 256;

/// Window state for one client
#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Request admitted
    Allowed {
        /// Requests left in the current window
        remaining: u32,
    },
    /// Request rejected
    Limited {
        /// Time until the current window ends
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Whether the request may proceed
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Fixed-window rate limiter keyed by client identifier (usually an IP)
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: DashMap<String, Window>,
    checks: std::sync::atomic::AtomicU64,
}

impl RateLimiter {
    /// Create a new rate limiter
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            window: config.window,
            max_requests: config.max_requests,
            windows: DashMap::new(),
            checks: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Check and count a request for `key` at the current instant
    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// Check and count a request for `key` at `now`
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let checks = self
            .checks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if checks % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let window = entry.value_mut();

        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            let elapsed = now.saturating_duration_since(window.started);
            return RateDecision::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            };
        }

        window.count += 1;
        RateDecision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Drop windows older than twice the window length
    pub fn sweep(&self, now: Instant) {
        let horizon = self.window * 2;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < horizon);
    }

    /// Number of tracked clients
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}
