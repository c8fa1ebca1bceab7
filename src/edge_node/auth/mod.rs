//! Authentication gates for the edge node
//!
//! Each gate owns an explicit store (nonce ledger, rate counters, actor records, token
//! cache) that is constructed once and shared with the middleware that applies it.

pub mod attack_detection;
pub mod auth_config;
pub mod auth_errors;
pub mod auth_middleware;
pub mod auth_types;
pub mod bootstrap;
pub mod nonce_operations;
pub mod rate_limit_middleware;
pub mod rate_limiting;
pub mod security_logging;
pub mod signature_verification;
pub mod token_cache;
pub mod token_middleware;

pub use auth_config::{
    EscalationConfig, FreshnessConfig, GuardConfig, RateLimitingConfig, ReplayConfig,
    ResponseCacheConfig, ResponseSecurityConfig, RouteLimit, SecurityLoggingConfig,
    TokenCacheConfig,
};
pub use auth_errors::{AuthenticationError, CustomAuthError, ErrorResponse};
pub use auth_middleware::{RequestSignatureGuard, SignatureGuardMiddleware};
pub use auth_types::{
    ActorStatus, AuthenticatedDevice, NonceLedger, NonceLedgerStats, NonceOutcome, RateDecision,
    RateLimiter, SuspiciousActorRegistry, VerifiedIdentity,
};
pub use bootstrap::{BootstrapCredentials, BootstrapHandshake, BootstrapResponse, SecretEnvelope};
pub use rate_limit_middleware::{RateLimitFlow, RateLimitMiddleware, SuspiciousActorGate};
pub use security_logging::{SecurityEvent, SecurityEventType, SecurityLogger};
pub use signature_verification::{CredentialHeaders, SignatureVerifier};
pub use token_cache::{
    Claims, FederatedTokenCache, HttpIdentityVerifier, IdentityVerifier, TokenRejection,
};
pub use token_middleware::FederatedTokenGate;
