//! Authentication types, stores and result enums for the edge trust layer
//!
//! The store structs live here; their behaviour is implemented in the sibling modules
//! (`nonce_operations`, `rate_limiting`, `attack_detection`).

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

use super::auth_config::EscalationConfig;

/// Outcome of presenting a nonce to a [`NonceLedger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceOutcome {
    /// First sighting inside the replay window; the nonce is now recorded
    Fresh,
    /// Already recorded and unexpired
    Replayed,
    /// Ledger is full of unexpired nonces; the nonce was not recorded
    Saturated,
}

/// In-memory record of one-time tokens and their first-seen time (epoch ms)
#[derive(Debug)]
pub struct NonceLedger {
    pub(crate) name: &'static str,
    pub(crate) replay_window_ms: u64,
    pub(crate) max_entries: usize,
    pub(crate) entries: Mutex<HashMap<String, u64>>,
    /// Earliest time any recorded nonce can expire; only touched under `entries`
    pub(crate) next_expiry_ms: AtomicU64,
}

/// Statistics about a nonce ledger
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NonceLedgerStats {
    pub name: String,
    pub total_nonces: usize,
    pub max_capacity: usize,
    pub utilization_percent: f64,
    pub oldest_nonce_age_ms: Option<u64>,
}

/// Per-key fixed window counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCounter {
    pub count: u64,
    pub window_reset_at_ms: u64,
}

/// Result of a single [`RateLimiter`] admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub admitted: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at_ms: u64,
    pub window_ms: u64,
}

/// Rate limiter keyed by caller identity
#[derive(Debug, Default)]
pub struct RateLimiter {
    pub(crate) counters: Mutex<HashMap<String, RateCounter>>,
}

/// Strike record for one actor (typically an IP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousActorRecord {
    pub strikes: u32,
    pub expires_at_ms: u64,
}

/// Snapshot of an actor's escalation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorStatus {
    pub strikes: u32,
    pub blocked: bool,
    pub expires_at_ms: u64,
}

/// Tracks rate-limit strikes per actor and promotes repeat offenders to a blocked state
#[derive(Debug)]
pub struct SuspiciousActorRegistry {
    pub(crate) config: EscalationConfig,
    pub(crate) records: Mutex<HashMap<String, SuspiciousActorRecord>>,
}

/// Device that passed the request signature guard, stored in request extensions
#[derive(Debug, Clone)]
pub struct AuthenticatedDevice {
    pub device_id: Option<String>,
    pub timestamp_ms: u64,
    pub nonce_fingerprint: String,
}

/// Identity resolved by the federated token gate, stored in request extensions
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: Option<String>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SuspiciousActorRegistry {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }
}

/// Short, non-reversible fingerprint used when nonces or tokens must appear in logs
pub fn log_fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..6])
}
