//! Fixed-window rate limiting keyed by caller identity
//!
//! Each key owns a counter and the instant its window resets. The read-modify-write of a
//! single admission happens under one lock acquisition.

use std::collections::HashMap;
use std::sync::MutexGuard;

use super::auth_types::{RateCounter, RateDecision, RateLimiter};
use crate::edge_node::clock::now_millis;
use crate::edge_node::sweeper::Sweepable;

impl RateLimiter {
    /// Count one call against `key`
    ///
    /// # Arguments
    /// * `key` - Rate-limit key, e.g. `ai:<ip>:<userId>:<deviceId>`
    /// * `limit` - Calls admitted per window
    /// * `window_ms` - Window length in milliseconds
    pub fn admit(&self, key: &str, limit: u64, window_ms: u64) -> RateDecision {
        self.admit_at(key, limit, window_ms, now_millis())
    }

    pub fn admit_at(&self, key: &str, limit: u64, window_ms: u64, now_ms: u64) -> RateDecision {
        let mut counters = self.lock();
        let counter = counters.entry(key.to_string()).or_insert(RateCounter {
            count: 0,
            window_reset_at_ms: 0,
        });

        if now_ms >= counter.window_reset_at_ms {
            counter.count = 0;
            counter.window_reset_at_ms = now_ms.saturating_add(window_ms);
        }
        counter.count = counter.count.saturating_add(1);

        RateDecision {
            admitted: counter.count <= limit,
            limit,
            remaining: limit.saturating_sub(counter.count),
            reset_at_ms: counter.window_reset_at_ms,
            window_ms,
        }
    }

    /// Current counter for `key`, if one is tracked
    pub fn counter(&self, key: &str) -> Option<RateCounter> {
        self.lock().get(key).copied()
    }

    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateCounter>> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Sweepable for RateLimiter {
    fn store_name(&self) -> &'static str {
        "rate_counters"
    }

    fn sweep_expired_at(&self, now_ms: u64) -> usize {
        let mut counters = self.lock();
        let before = counters.len();
        counters.retain(|_, counter| now_ms < counter.window_reset_at_ms);
        before - counters.len()
    }
}
