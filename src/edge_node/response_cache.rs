//! Ephemeral response cache
//!
//! Memoises JSON replies under a request fingerprint for a bounded time. Concurrent
//! misses may both populate an entry; the last writer wins.

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::edge_node::clock::now_millis;
use crate::edge_node::sweeper::Sweepable;
use crate::error::{GuardError, GuardResult};

#[derive(Debug, Clone)]
struct CachedResponse {
    value: Value,
    expires_at_ms: u64,
}

#[derive(Debug)]
pub struct ResponseCache {
    default_ttl_ms: u64,
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl_ms: default_ttl.as_millis() as u64,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fingerprint of `parts` under `namespace`, e.g. `ai-echo:3f2a...`
    ///
    /// Each part is length-prefixed before hashing so `["ab", "c"]` and `["a", "bc"]`
    /// never collide.
    pub fn fingerprint(namespace: &str, parts: &[&[u8]]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        format!("{}:{}", namespace, hex::encode(hasher.finalize()))
    }

    pub fn get(&self, fingerprint: &str) -> Option<Value> {
        self.get_at(fingerprint, now_millis())
    }

    pub fn get_at(&self, fingerprint: &str, now_ms: u64) -> Option<Value> {
        self.lock()
            .get(fingerprint)
            .filter(|entry| now_ms < entry.expires_at_ms)
            .map(|entry| entry.value.clone())
    }

    /// Store `value`; `ttl` of `None` uses the cache default
    pub fn set(&self, fingerprint: &str, value: Value, ttl: Option<Duration>) {
        self.set_at(fingerprint, value, ttl, now_millis());
    }

    pub fn set_at(&self, fingerprint: &str, value: Value, ttl: Option<Duration>, now_ms: u64) {
        let ttl_ms = ttl.map_or(self.default_ttl_ms, |ttl| ttl.as_millis() as u64);
        self.lock().insert(
            fingerprint.to_string(),
            CachedResponse {
                value,
                expires_at_ms: now_ms.saturating_add(ttl_ms),
            },
        );
    }

    /// Remove every entry whose fingerprint matches the regular expression `pattern`
    pub fn invalidate(&self, pattern: &str) -> GuardResult<usize> {
        let matcher = Regex::new(pattern)
            .map_err(|e| GuardError::Config(format!("invalid cache pattern '{}': {}", pattern, e)))?;
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|fingerprint, _| !matcher.is_match(fingerprint));
        Ok(before - entries.len())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedResponse>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Sweepable for ResponseCache {
    fn store_name(&self) -> &'static str {
        "response_cache"
    }

    fn sweep_expired_at(&self, now_ms: u64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now_ms < entry.expires_at_ms);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set_at("k", json!({"reply": 1}), None, 1_000);
        assert_eq!(cache.get_at("k", 60_999), Some(json!({"reply": 1})));
        assert_eq!(cache.get_at("k", 61_000), None);

        cache.set_at("short", json!(2), Some(Duration::from_millis(10)), 1_000);
        assert!(cache.get_at("short", 1_009).is_some());
        assert!(cache.get_at("short", 1_010).is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set_at("k", json!("first"), None, 0);
        cache.set_at("k", json!("second"), None, 0);
        assert_eq!(cache.get_at("k", 1), Some(json!("second")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fingerprint_separates_parts() {
        let a = ResponseCache::fingerprint("ns", &[b"ab", b"c"]);
        let b = ResponseCache::fingerprint("ns", &[b"a", b"bc"]);
        assert_ne!(a, b);
        assert!(a.starts_with("ns:"));
        assert_eq!(a, ResponseCache::fingerprint("ns", &[b"ab", b"c"]));
    }

    #[test]
    fn test_invalidate_by_pattern() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.set("ai-echo:1", json!(1), None);
        cache.set("ai-echo:2", json!(2), None);
        cache.set("other:1", json!(3), None);
        assert_eq!(cache.invalidate("^ai-echo:").unwrap(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("(unclosed").is_err());
    }

    #[test]
    fn test_sweep_removes_expired() {
        let cache = ResponseCache::new(Duration::from_millis(100));
        cache.set_at("old", json!(1), None, 0);
        cache.set_at("new", json!(2), None, 50);
        assert_eq!(cache.sweep_expired_at(100), 1);
        assert!(cache.get_at("new", 100).is_some());
    }
}
