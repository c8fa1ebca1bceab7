//! Federated identity token cache
//!
//! Verifying a bearer token means a round trip to the external identity provider. The
//! result is cached until `min(token expiry, now + ttl)`. Concurrent lookups of a token
//! that is not cached yet share one provider call.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::auth_types::log_fingerprint;
use crate::edge_node::clock::now_millis;
use crate::edge_node::config::IdentityProviderConfig;
use crate::edge_node::sweeper::Sweepable;
use crate::error::{GuardError, GuardResult};

/// Claims returned by the identity provider for a valid token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, the federated user id
    pub sub: String,
    /// Token expiry in epoch seconds
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Claims {
    pub fn new(sub: impl Into<String>, exp: Option<u64>) -> Self {
        Self {
            sub: sub.into(),
            exp,
            email: None,
            extra: HashMap::new(),
        }
    }

    /// Expiry in epoch milliseconds
    pub fn expires_at_ms(&self) -> Option<u64> {
        self.exp.map(|exp| exp.saturating_mul(1000))
    }
}

/// Why a token was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("token expired")]
    Expired,
    #[error("token invalid: {0}")]
    Invalid(String),
}

/// Verifies bearer tokens against an identity provider
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims, TokenRejection>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    claims: Claims,
    expires_at_ms: u64,
}

type SharedVerification = Shared<BoxFuture<'static, Result<Claims, TokenRejection>>>;

/// Cache of verified federated tokens with single-flight misses
pub struct FederatedTokenCache {
    verifier: Arc<dyn IdentityVerifier>,
    ttl_ms: u64,
    entries: Mutex<HashMap<String, CachedToken>>,
    in_flight: Mutex<HashMap<String, (u64, SharedVerification)>>,
    next_flight_id: AtomicU64,
    provider_calls: AtomicU64,
}

impl FederatedTokenCache {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, ttl: Duration) -> Self {
        Self {
            verifier,
            ttl_ms: ttl.as_millis() as u64,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_flight_id: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
        }
    }

    /// Resolve `token` to claims, verifying with the provider on a miss
    pub async fn resolve(&self, token: &str) -> Result<Claims, TokenRejection> {
        if let Some(claims) = self.cached_at(token, now_millis()) {
            return Ok(claims);
        }

        let (flight_id, verification) = self.join_or_start(token);
        let outcome = verification.await;
        self.finish_flight(token, flight_id, &outcome, now_millis());
        outcome
    }

    /// Cached claims for `token` if present and unexpired at `now_ms`
    pub fn cached_at(&self, token: &str, now_ms: u64) -> Option<Claims> {
        lock(&self.entries)
            .get(token)
            .filter(|entry| now_ms < entry.expires_at_ms)
            .map(|entry| entry.claims.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of verifications sent to the identity provider
    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    fn join_or_start(&self, token: &str) -> (u64, SharedVerification) {
        let mut in_flight = lock(&self.in_flight);
        if let Some((id, verification)) = in_flight.get(token) {
            debug!("Joining in-flight verification for token {}", log_fingerprint(token));
            return (*id, verification.clone());
        }

        let id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        let verifier = Arc::clone(&self.verifier);
        let owned = token.to_string();
        let verification = async move { verifier.verify(&owned).await }
            .boxed()
            .shared();
        in_flight.insert(token.to_string(), (id, verification.clone()));
        (id, verification)
    }

    /// Retire flight `flight_id`. Only the first waiter to finish the current flight for
    /// `token` writes the outcome; late waiters of an older flight leave the cache alone.
    fn finish_flight(
        &self,
        token: &str,
        flight_id: u64,
        outcome: &Result<Claims, TokenRejection>,
        now_ms: u64,
    ) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(token).is_some_and(|(id, _)| *id == flight_id) {
            in_flight.remove(token);
            self.record_outcome(token, outcome, now_ms);
        }
    }

    fn record_outcome(&self, token: &str, outcome: &Result<Claims, TokenRejection>, now_ms: u64) {
        let mut entries = lock(&self.entries);
        match outcome {
            Ok(claims) => {
                let cap = now_ms.saturating_add(self.ttl_ms);
                let expires_at_ms = claims.expires_at_ms().map_or(cap, |exp| exp.min(cap));
                if expires_at_ms > now_ms {
                    entries.insert(
                        token.to_string(),
                        CachedToken {
                            claims: claims.clone(),
                            expires_at_ms,
                        },
                    );
                }
            }
            Err(rejection) => {
                entries.remove(token);
                debug!(
                    "Token {} rejected by identity provider: {}",
                    log_fingerprint(token),
                    rejection
                );
            }
        }
    }
}

impl Sweepable for FederatedTokenCache {
    fn store_name(&self) -> &'static str {
        "federated_tokens"
    }

    fn sweep_expired_at(&self, now_ms: u64) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at_ms > now_ms);
        before - entries.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Deserialize)]
struct ProviderRejection {
    #[serde(default)]
    reason: Option<String>,
}

/// Identity verifier that posts `{ "token": ... }` to the provider's verify endpoint
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpIdentityVerifier {
    pub fn new(config: &IdentityProviderConfig) -> GuardResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GuardError::IdentityProvider(format!("HTTP client setup failed: {}", e)))?;
        info!("Identity provider verification via {}", config.verify_url);
        Ok(Self {
            client,
            verify_url: config.verify_url.clone(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, TokenRejection> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                warn!("Identity provider unreachable: {}", e);
                TokenRejection::Invalid("provider_error".to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            let claims = response.json::<Claims>().await.map_err(|e| {
                warn!("Identity provider returned unreadable claims: {}", e);
                TokenRejection::Invalid("provider_error".to_string())
            })?;
            if claims.expires_at_ms().is_some_and(|exp| exp <= now_millis()) {
                return Err(TokenRejection::Expired);
            }
            return Ok(claims);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            let reason = response
                .json::<ProviderRejection>()
                .await
                .ok()
                .and_then(|body| body.reason);
            return match reason.as_deref() {
                Some("expired") => Err(TokenRejection::Expired),
                Some(other) => Err(TokenRejection::Invalid(other.to_string())),
                None => Err(TokenRejection::Invalid("invalid".to_string())),
            };
        }

        if status.is_client_error() {
            return Err(TokenRejection::Invalid("rejected".to_string()));
        }

        warn!("Identity provider answered {}", status);
        Err(TokenRejection::Invalid("provider_error".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingVerifier {
        calls: AtomicUsize,
        delay: Duration,
        exp: Option<u64>,
    }

    #[async_trait]
    impl IdentityVerifier for CountingVerifier {
        async fn verify(&self, token: &str) -> Result<Claims, TokenRejection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match token {
                "expired" => Err(TokenRejection::Expired),
                "garbage" => Err(TokenRejection::Invalid("invalid".into())),
                _ => Ok(Claims::new(format!("user-{}", token), self.exp)),
            }
        }
    }

    fn cache(delay_ms: u64, exp: Option<u64>) -> (Arc<CountingVerifier>, FederatedTokenCache) {
        let verifier = Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(delay_ms),
            exp,
        });
        let cache = FederatedTokenCache::new(verifier.clone(), Duration::from_secs(45 * 60));
        (verifier, cache)
    }

    #[tokio::test]
    async fn test_hit_skips_provider() {
        let (verifier, cache) = cache(0, None);
        let first = cache.resolve("alice").await.unwrap();
        let second = cache.resolve("alice").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sub, "user-alice");
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.provider_calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_distinguished_and_not_cached() {
        let (verifier, cache) = cache(0, None);
        assert_eq!(cache.resolve("expired").await, Err(TokenRejection::Expired));
        assert!(matches!(
            cache.resolve("garbage").await,
            Err(TokenRejection::Invalid(_))
        ));
        assert_eq!(cache.resolve("expired").await, Err(TokenRejection::Expired));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_call() {
        let (verifier, cache) = cache(50, None);
        let cache = Arc::new(cache);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.resolve("bob").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().sub, "user-bob");
        }
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expiry_bounded_by_ttl_and_token_exp() {
        let (_, cache) = cache(0, None);
        let now = 1_000_000;

        cache.record_outcome("long", &Ok(Claims::new("a", Some(10_000_000))), now);
        assert!(cache.cached_at("long", now + cache.ttl_ms() - 1).is_some());
        assert!(cache.cached_at("long", now + cache.ttl_ms()).is_none());

        // Provider expiry earlier than the TTL cap wins
        cache.record_outcome("short", &Ok(Claims::new("b", Some(1_060))), now);
        assert!(cache.cached_at("short", 1_059_999).is_some());
        assert!(cache.cached_at("short", 1_060_000).is_none());

        // Already expired claims are not cached at all
        cache.record_outcome("stale", &Ok(Claims::new("c", Some(999))), now);
        assert!(cache.cached_at("stale", now).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failure_evicts_stale_entry() {
        let (_, cache) = cache(0, None);
        cache.record_outcome("t", &Ok(Claims::new("a", None)), 0);
        assert_eq!(cache.len(), 1);
        cache.record_outcome("t", &Err(TokenRejection::Expired), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_late_waiter_of_failed_flight_keeps_newer_entry() {
        let (_, cache) = cache(0, None);
        let (failed, _) = cache.join_or_start("t");
        cache.finish_flight("t", failed, &Err(TokenRejection::Expired), 0);

        let (succeeded, _) = cache.join_or_start("t");
        assert_ne!(failed, succeeded);
        cache.finish_flight("t", succeeded, &Ok(Claims::new("a", None)), 1);
        assert!(cache.cached_at("t", 2).is_some());

        cache.finish_flight("t", failed, &Err(TokenRejection::Expired), 2);
        assert!(cache.cached_at("t", 3).is_some());
        cache.finish_flight("t", succeeded, &Err(TokenRejection::Expired), 3);
        assert!(cache.cached_at("t", 4).is_some());
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let (_, cache) = cache(0, None);
        cache.record_outcome("a", &Ok(Claims::new("a", Some(10))), 0);
        cache.record_outcome("b", &Ok(Claims::new("b", None)), 0);
        assert_eq!(cache.sweep_expired_at(10_000), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_claims_keep_extra_fields() {
        let claims: Claims = serde_json::from_str(
            r#"{"sub":"u1","exp":1700000000,"email":"u1@example.com","role":"admin"}"#,
        )
        .unwrap();
        assert_eq!(claims.expires_at_ms(), Some(1_700_000_000_000));
        assert_eq!(claims.email.as_deref(), Some("u1@example.com"));
        assert_eq!(claims.extra.get("role"), Some(&serde_json::json!("admin")));
    }
}
