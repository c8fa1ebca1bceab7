//! Suspicious-actor escalation
//!
//! Every rate-limited outcome is a strike against the caller's actor key. Reaching the
//! strike threshold blocks the actor until the record expires. Strikes and the block
//! share one expiry, so a quiet period never lifts a block early.

use log::warn;
use std::collections::HashMap;
use std::sync::MutexGuard;

use super::auth_types::{ActorStatus, SuspiciousActorRecord, SuspiciousActorRegistry};
use crate::edge_node::clock::now_millis;
use crate::edge_node::sweeper::Sweepable;

impl SuspiciousActorRegistry {
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn strike_threshold(&self) -> u32 {
        self.config.strike_threshold
    }

    /// Record one limited outcome for `actor`
    pub fn record_strike(&self, actor: &str) -> ActorStatus {
        self.record_strike_at(actor, now_millis())
    }

    pub fn record_strike_at(&self, actor: &str, now_ms: u64) -> ActorStatus {
        if !self.config.enabled {
            return ActorStatus {
                strikes: 0,
                blocked: false,
                expires_at_ms: now_ms,
            };
        }

        let threshold = self.config.strike_threshold;
        let block_until = now_ms.saturating_add(self.config.block_duration_ms);
        let mut records = self.lock();

        let record = records
            .entry(actor.to_string())
            .and_modify(|record| {
                if now_ms >= record.expires_at_ms {
                    *record = SuspiciousActorRecord {
                        strikes: 0,
                        expires_at_ms: block_until,
                    };
                }
            })
            .or_insert(SuspiciousActorRecord {
                strikes: 0,
                expires_at_ms: block_until,
            });

        record.strikes = record.strikes.saturating_add(1);
        if record.strikes == threshold {
            record.expires_at_ms = block_until;
            warn!(
                "Actor {} reached {} strikes, blocked until {}",
                actor, threshold, record.expires_at_ms
            );
        } else if record.strikes > threshold && self.config.extend_block_on_strike {
            record.expires_at_ms = block_until;
        }

        ActorStatus {
            strikes: record.strikes,
            blocked: record.strikes >= threshold,
            expires_at_ms: record.expires_at_ms,
        }
    }

    pub fn is_blocked(&self, actor: &str) -> bool {
        self.is_blocked_at(actor, now_millis())
    }

    pub fn is_blocked_at(&self, actor: &str, now_ms: u64) -> bool {
        self.status_at(actor, now_ms).is_some_and(|status| status.blocked)
    }

    /// Unexpired escalation state for `actor`
    pub fn status_at(&self, actor: &str, now_ms: u64) -> Option<ActorStatus> {
        if !self.config.enabled {
            return None;
        }
        let threshold = self.config.strike_threshold;
        self.lock()
            .get(actor)
            .filter(|record| now_ms < record.expires_at_ms)
            .map(|record| ActorStatus {
                strikes: record.strikes,
                blocked: record.strikes >= threshold,
                expires_at_ms: record.expires_at_ms,
            })
    }

    pub fn blocked_count_at(&self, now_ms: u64) -> usize {
        let threshold = self.config.strike_threshold;
        self.lock()
            .values()
            .filter(|record| record.strikes >= threshold && now_ms < record.expires_at_ms)
            .count()
    }

    pub fn tracked_actors(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SuspiciousActorRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Sweepable for SuspiciousActorRegistry {
    fn store_name(&self) -> &'static str {
        "suspicious_actors"
    }

    fn sweep_expired_at(&self, now_ms: u64) -> usize {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|_, record| now_ms < record.expires_at_ms);
        before - records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge_node::auth::auth_config::EscalationConfig;

    const BLOCK: u64 = 86_400_000;

    fn registry(extend_block_on_strike: bool) -> SuspiciousActorRegistry {
        SuspiciousActorRegistry::new(EscalationConfig {
            strike_threshold: 3,
            block_duration_ms: BLOCK,
            extend_block_on_strike,
            ..EscalationConfig::default()
        })
    }

    #[test]
    fn test_threshold_blocks_actor() {
        let registry = registry(false);
        assert!(!registry.record_strike_at("1.2.3.4", 0).blocked);
        assert!(!registry.record_strike_at("1.2.3.4", 10).blocked);
        let third = registry.record_strike_at("1.2.3.4", 20);
        assert!(third.blocked);
        assert_eq!(third.expires_at_ms, 20 + BLOCK);
        assert!(registry.is_blocked_at("1.2.3.4", 21));
        assert!(!registry.is_blocked_at("5.6.7.8", 21));
        assert_eq!(registry.blocked_count_at(21), 1);
    }

    #[test]
    fn test_block_expires_and_strikes_clear() {
        let registry = registry(false);
        for now in 0..3 {
            registry.record_strike_at("actor", now);
        }
        let expires = 2 + BLOCK;
        assert!(registry.is_blocked_at("actor", expires - 1));
        assert!(!registry.is_blocked_at("actor", expires));
        assert!(registry.status_at("actor", expires).is_none());

        let fresh = registry.record_strike_at("actor", expires);
        assert_eq!(fresh.strikes, 1);
        assert!(!fresh.blocked);
    }

    #[test]
    fn test_fixed_block_is_not_extended() {
        let registry = registry(false);
        for now in 0..3 {
            registry.record_strike_at("actor", now);
        }
        let later = registry.record_strike_at("actor", 1_000_000);
        assert_eq!(later.strikes, 4);
        assert_eq!(later.expires_at_ms, 2 + BLOCK);
    }

    #[test]
    fn test_sliding_block_when_configured() {
        let registry = registry(true);
        for now in 0..3 {
            registry.record_strike_at("actor", now);
        }
        let later = registry.record_strike_at("actor", 1_000_000);
        assert_eq!(later.expires_at_ms, 1_000_000 + BLOCK);
    }

    #[test]
    fn test_disabled_registry_never_blocks() {
        let registry = SuspiciousActorRegistry::new(EscalationConfig {
            enabled: false,
            strike_threshold: 1,
            ..EscalationConfig::default()
        });
        registry.record_strike_at("actor", 0);
        assert!(!registry.is_blocked_at("actor", 1));
        assert_eq!(registry.tracked_actors(), 0);
    }

    #[test]
    fn test_sweep_removes_expired_records() {
        let registry = registry(false);
        registry.record_strike_at("a", 0);
        registry.record_strike_at("b", 100);
        assert_eq!(registry.sweep_expired_at(BLOCK), 1);
        assert_eq!(registry.tracked_actors(), 1);
    }
}
