//! Nonce ledger operations for replay prevention
//!
//! `observe` is a single check-and-insert under the ledger lock, so of any number of
//! concurrent callers presenting the same nonce exactly one receives
//! [`NonceOutcome::Fresh`]. A full ledger never drops a live nonce: once expired entries
//! are pruned and no room remains, new nonces are refused as [`NonceOutcome::Saturated`].

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::auth_config::ReplayConfig;
use super::auth_types::{log_fingerprint, NonceLedger, NonceLedgerStats, NonceOutcome};
use crate::edge_node::clock::now_millis;
use crate::edge_node::sweeper::Sweepable;

impl NonceLedger {
    pub fn new(name: &'static str, replay_window_ms: u64, max_entries: usize) -> Self {
        Self {
            name,
            replay_window_ms,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            next_expiry_ms: AtomicU64::new(0),
        }
    }

    pub fn from_config(name: &'static str, config: &ReplayConfig) -> Self {
        Self::new(name, config.replay_window_ms, config.max_entries)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn replay_window_ms(&self) -> u64 {
        self.replay_window_ms
    }

    /// Record `nonce` if unseen, otherwise report a replay
    pub fn observe(&self, nonce: &str) -> NonceOutcome {
        self.observe_at(nonce, now_millis())
    }

    pub fn observe_at(&self, nonce: &str, now_ms: u64) -> NonceOutcome {
        let mut entries = self.lock();

        if let Some(&first_seen) = entries.get(nonce) {
            if !self.is_expired(first_seen, now_ms) {
                debug!(
                    "Replay of nonce {} rejected by {} ledger",
                    log_fingerprint(nonce),
                    self.name
                );
                return NonceOutcome::Replayed;
            }
        } else if entries.len() >= self.max_entries && !self.make_room(&mut entries, now_ms) {
            warn!(
                "{} nonce ledger at capacity ({}), refusing nonce {}",
                self.name,
                self.max_entries,
                log_fingerprint(nonce)
            );
            return NonceOutcome::Saturated;
        }

        entries.insert(nonce.to_string(), now_ms);
        NonceOutcome::Fresh
    }

    /// Whether `nonce` is currently remembered
    pub fn contains_at(&self, nonce: &str, now_ms: u64) -> bool {
        self.lock()
            .get(nonce)
            .is_some_and(|&first_seen| !self.is_expired(first_seen, now_ms))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> NonceLedgerStats {
        self.stats_at(now_millis())
    }

    pub fn stats_at(&self, now_ms: u64) -> NonceLedgerStats {
        let entries = self.lock();
        let total_nonces = entries.len();
        NonceLedgerStats {
            name: self.name.to_string(),
            total_nonces,
            max_capacity: self.max_entries,
            utilization_percent: (total_nonces as f64 / self.max_entries as f64) * 100.0,
            oldest_nonce_age_ms: entries
                .values()
                .min()
                .map(|&oldest| now_ms.saturating_sub(oldest)),
        }
    }

    fn is_expired(&self, first_seen_ms: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(first_seen_ms) > self.replay_window_ms
    }

    /// Prune expired entries, returning whether there is room for one more.
    ///
    /// The full scan only runs once the earliest recorded nonce can have expired, so a
    /// flood against a saturated ledger is refused without touching the map.
    fn make_room(&self, entries: &mut HashMap<String, u64>, now_ms: u64) -> bool {
        if now_ms < self.next_expiry_ms.load(Ordering::Relaxed) {
            return false;
        }
        self.prune(entries, now_ms);
        entries.len() < self.max_entries
    }

    fn prune(&self, entries: &mut HashMap<String, u64>, now_ms: u64) -> usize {
        let window = self.replay_window_ms;
        let before = entries.len();
        entries.retain(|_, &mut first_seen| now_ms.saturating_sub(first_seen) <= window);
        let next_expiry = entries
            .values()
            .min()
            .map_or(0, |&oldest| oldest.saturating_add(window).saturating_add(1));
        self.next_expiry_ms.store(next_expiry, Ordering::Relaxed);
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Sweepable for NonceLedger {
    fn store_name(&self) -> &'static str {
        self.name
    }

    fn sweep_expired_at(&self, now_ms: u64) -> usize {
        let mut entries = self.lock();
        self.prune(&mut entries, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: u64 = 300_000;

    #[test]
    fn test_first_observation_is_fresh_then_replayed() {
        let ledger = NonceLedger::new("test", WINDOW, 100);
        assert_eq!(ledger.observe_at("abc", 1_000), NonceOutcome::Fresh);
        assert_eq!(ledger.observe_at("abc", 1_001), NonceOutcome::Replayed);
        assert_eq!(ledger.observe_at("abc", 1_000 + WINDOW), NonceOutcome::Replayed);
        assert_eq!(ledger.observe_at("xyz", 1_001), NonceOutcome::Fresh);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_replayed_observation_keeps_first_seen_time() {
        let ledger = NonceLedger::new("test", WINDOW, 100);
        ledger.observe_at("abc", 1_000);
        ledger.observe_at("abc", 200_000);
        assert_eq!(
            ledger.stats_at(250_000).oldest_nonce_age_ms,
            Some(249_000)
        );
    }

    #[test]
    fn test_expired_nonce_is_fresh_again() {
        let ledger = NonceLedger::new("test", WINDOW, 100);
        ledger.observe_at("abc", 0);
        assert!(ledger.contains_at("abc", WINDOW));
        assert!(!ledger.contains_at("abc", WINDOW + 1));
        assert_eq!(ledger.observe_at("abc", WINDOW + 1), NonceOutcome::Fresh);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let ledger = NonceLedger::new("test", WINDOW, 100);
        ledger.observe_at("old", 0);
        ledger.observe_at("new", 100_000);
        assert_eq!(ledger.sweep_expired_at(WINDOW + 1), 1);
        assert!(ledger.contains_at("new", WINDOW + 1));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_full_ledger_refuses_new_nonces_and_keeps_live_ones() {
        let ledger = NonceLedger::new("test", WINDOW, 2);
        assert_eq!(ledger.observe_at("a", 1), NonceOutcome::Fresh);
        assert_eq!(ledger.observe_at("b", 2), NonceOutcome::Fresh);
        for i in 0..10 {
            assert_eq!(
                ledger.observe_at(&format!("junk-{}", i), 3),
                NonceOutcome::Saturated
            );
        }
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.observe_at("a", 4), NonceOutcome::Replayed);
        assert_eq!(ledger.observe_at("b", 4), NonceOutcome::Replayed);

        let stats = ledger.stats_at(3);
        assert_eq!(stats.max_capacity, 2);
        assert!((stats.utilization_percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_full_ledger_accepts_again_once_oldest_expires() {
        let ledger = NonceLedger::new("test", WINDOW, 2);
        ledger.observe_at("a", 1);
        ledger.observe_at("b", 100_000);
        assert_eq!(ledger.observe_at("c", WINDOW + 1), NonceOutcome::Saturated);
        assert_eq!(ledger.observe_at("c", WINDOW + 2), NonceOutcome::Fresh);
        assert!(!ledger.contains_at("a", WINDOW + 2));
        assert!(ledger.contains_at("b", WINDOW + 2));
        assert_eq!(ledger.observe_at("d", WINDOW + 3), NonceOutcome::Saturated);
    }

    #[test]
    fn test_independent_ledgers_do_not_share_state() {
        let bootstrap = NonceLedger::new("bootstrap", WINDOW, 100);
        let steady = NonceLedger::new("request", WINDOW, 100);
        assert_eq!(bootstrap.observe_at("n1", 10), NonceOutcome::Fresh);
        assert_eq!(steady.observe_at("n1", 10), NonceOutcome::Fresh);
    }

    #[test]
    fn test_concurrent_observers_exactly_one_fresh() {
        let ledger = Arc::new(NonceLedger::new("test", WINDOW, 1000));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.observe_at("contested", 5_000))
            })
            .collect();

        let fresh = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| *outcome == NonceOutcome::Fresh)
            .count();
        assert_eq!(fresh, 1);
    }
}
