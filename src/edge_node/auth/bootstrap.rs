//! Credential bootstrap handshake
//!
//! A device proves it knows the static API key by signing
//! `app_identifier ‖ timestamp ‖ nonce` with it. In exchange it receives the deployment
//! signing secret sealed under a key derived from the same API key. The only state kept
//! between calls is the bootstrap nonce ledger.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{error, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use zeroize::Zeroizing;

use super::auth_config::FreshnessConfig;
use super::auth_errors::AuthenticationError;
use super::auth_types::{log_fingerprint, NonceLedger, NonceOutcome};
use super::signature_verification::{CredentialHeaders, SignatureFormatError, SignatureVerifier};
use crate::edge_node::clock::now_millis;
use crate::edge_node::config::Secret;
use crate::error::{GuardError, GuardResult};

const ENVELOPE_NONCE_LEN: usize = 12;
const ENVELOPE_TAG_LEN: usize = 16;

/// Success body of the bootstrap endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapResponse {
    pub encrypted_secret: String,
}

/// AES-256-GCM envelope keyed by `SHA-256(api_key)`: `base64(nonce ‖ ciphertext ‖ tag)`
pub struct SecretEnvelope;

impl SecretEnvelope {
    pub fn seal(api_key: &[u8], secret: &[u8]) -> GuardResult<String> {
        let cipher = Self::cipher(api_key)?;

        let mut nonce_bytes = [0u8; ENVELOPE_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, secret)
            .map_err(|e| GuardError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut envelope = nonce_bytes.to_vec();
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(envelope))
    }

    /// Client side: recover the signing secret from an envelope
    pub fn open(api_key: &[u8], envelope: &str) -> GuardResult<Zeroizing<Vec<u8>>> {
        let raw = BASE64
            .decode(envelope.trim())
            .map_err(|e| GuardError::Crypto(format!("Envelope is not base64: {}", e)))?;
        if raw.len() < ENVELOPE_NONCE_LEN + ENVELOPE_TAG_LEN {
            return Err(GuardError::Crypto("Invalid envelope length".to_string()));
        }

        let cipher = Self::cipher(api_key)?;
        let (nonce, ciphertext) = raw.split_at(ENVELOPE_NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| GuardError::Crypto(format!("Decryption failed: {}", e)))
    }

    fn cipher(api_key: &[u8]) -> GuardResult<Aes256Gcm> {
        let key: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(api_key).into());
        Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| GuardError::Crypto(format!("Invalid envelope key: {}", e)))
    }
}

/// Server-held credentials consumed by the handshake
#[derive(Debug, Clone, Default)]
pub struct BootstrapCredentials {
    pub api_key: Option<Secret>,
    pub app_identifier: Option<String>,
    pub signing_secret: Option<Secret>,
}

/// One-round-trip exchange of API-key possession for the sealed signing secret
pub struct BootstrapHandshake {
    credentials: BootstrapCredentials,
    ledger: Arc<NonceLedger>,
    freshness: FreshnessConfig,
}

impl BootstrapHandshake {
    pub fn new(
        credentials: BootstrapCredentials,
        ledger: Arc<NonceLedger>,
        freshness: FreshnessConfig,
    ) -> Self {
        Self {
            credentials,
            ledger,
            freshness,
        }
    }

    pub fn ledger(&self) -> &Arc<NonceLedger> {
        &self.ledger
    }

    pub fn handle(
        &self,
        headers: Result<CredentialHeaders, Vec<String>>,
        correlation_id: &str,
    ) -> Result<BootstrapResponse, AuthenticationError> {
        self.handle_at(headers, now_millis(), correlation_id)
    }

    /// Run the handshake state machine at `now_ms`
    pub fn handle_at(
        &self,
        headers: Result<CredentialHeaders, Vec<String>>,
        now_ms: u64,
        correlation_id: &str,
    ) -> Result<BootstrapResponse, AuthenticationError> {
        let (api_key, app_identifier, signing_secret) = match (
            &self.credentials.api_key,
            &self.credentials.app_identifier,
            &self.credentials.signing_secret,
        ) {
            (Some(api_key), Some(app_identifier), Some(signing_secret)) => {
                (api_key, app_identifier, signing_secret)
            }
            _ => {
                error!(
                    "Bootstrap handshake unavailable: server credentials not configured (correlation_id: {})",
                    correlation_id
                );
                return Err(AuthenticationError::ServerMisconfigured {
                    reason: "bootstrap credentials not configured".to_string(),
                    correlation_id: correlation_id.to_string(),
                });
            }
        };

        let headers = headers.map_err(|missing| AuthenticationError::MissingCredentialHeader {
            missing,
            correlation_id: correlation_id.to_string(),
        })?;

        let timestamp_ms = headers
            .timestamp_ms()
            .map_err(|e| malformed(e, correlation_id))?;
        SignatureVerifier::check_bootstrap_freshness(timestamp_ms, now_ms, &self.freshness)
            .map_err(|reason| AuthenticationError::ExpiredOrFutureTimestamp {
                timestamp: timestamp_ms,
                current_time: now_ms,
                reason,
                correlation_id: correlation_id.to_string(),
            })?;

        if self.ledger.observe_at(&headers.nonce, now_ms) != NonceOutcome::Fresh {
            warn!(
                "Bootstrap replay rejected for nonce {} (correlation_id: {})",
                log_fingerprint(&headers.nonce),
                correlation_id
            );
            return Err(AuthenticationError::ReplayedNonce {
                nonce_fingerprint: log_fingerprint(&headers.nonce),
                correlation_id: correlation_id.to_string(),
            });
        }

        let verified = SignatureVerifier::verify_bootstrap(
            api_key.as_bytes(),
            app_identifier,
            &headers.timestamp,
            &headers.nonce,
            &headers.signature,
        )
        .map_err(|e| malformed(e, correlation_id))?;
        if !verified {
            return Err(AuthenticationError::SignatureMismatch {
                correlation_id: correlation_id.to_string(),
            });
        }

        let encrypted_secret = SecretEnvelope::seal(api_key.as_bytes(), signing_secret.as_bytes())
            .map_err(|e| {
                error!("Sealing signing secret failed: {} (correlation_id: {})", e, correlation_id);
                AuthenticationError::ServerMisconfigured {
                    reason: "secret envelope could not be sealed".to_string(),
                    correlation_id: correlation_id.to_string(),
                }
            })?;

        info!(
            "Issued sealed signing secret for nonce {} (correlation_id: {})",
            log_fingerprint(&headers.nonce),
            correlation_id
        );
        Ok(BootstrapResponse { encrypted_secret })
    }
}

fn malformed(error: SignatureFormatError, correlation_id: &str) -> AuthenticationError {
    AuthenticationError::MalformedSignature {
        reason: error.to_string(),
        correlation_id: correlation_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const API_KEY: &str = "static-api-key";
    const SIGNING_SECRET: &str = "0123456789abcdef0123456789abcdef";
    const T: u64 = 1_700_000_000_000;

    fn handshake() -> BootstrapHandshake {
        BootstrapHandshake::new(
            BootstrapCredentials {
                api_key: Some(Secret::new(API_KEY)),
                app_identifier: Some("app1".to_string()),
                signing_secret: Some(Secret::new(SIGNING_SECRET)),
            },
            Arc::new(NonceLedger::new("bootstrap", 300_000, 1000)),
            FreshnessConfig::default(),
        )
    }

    fn signed(timestamp_ms: u64, nonce: &str) -> Result<CredentialHeaders, Vec<String>> {
        Ok(SignatureVerifier::sign_bootstrap_request_at(
            API_KEY.as_bytes(),
            "app1",
            timestamp_ms,
            nonce,
        ))
    }

    #[test]
    fn test_envelope_round_trip() {
        let sealed = SecretEnvelope::seal(b"key", b"secret-bytes").unwrap();
        let opened = SecretEnvelope::open(b"key", &sealed).unwrap();
        assert_eq!(opened.as_slice(), b"secret-bytes");
        assert!(SecretEnvelope::open(b"wrong-key", &sealed).is_err());
        assert!(SecretEnvelope::open(b"key", "AAAA").is_err());
    }

    #[test]
    fn test_envelope_nonce_differs_per_seal() {
        let a = SecretEnvelope::seal(b"key", b"secret").unwrap();
        let b = SecretEnvelope::seal(b"key", b"secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_successful_handshake_then_replay() {
        let handshake = handshake();
        let response = handshake.handle_at(signed(T, "abc"), T, "c1").unwrap();
        let secret = SecretEnvelope::open(API_KEY.as_bytes(), &response.encrypted_secret).unwrap();
        assert_eq!(secret.as_slice(), SIGNING_SECRET.as_bytes());
        assert!(!response.encrypted_secret.contains(SIGNING_SECRET));

        let replay = handshake.handle_at(signed(T, "abc"), T, "c2").unwrap_err();
        assert!(matches!(replay, AuthenticationError::ReplayedNonce { .. }));
        assert_eq!(replay.public_message(), "Nonce already used");
    }

    #[test]
    fn test_unconfigured_server_is_500_before_header_checks() {
        let handshake = BootstrapHandshake::new(
            BootstrapCredentials {
                api_key: Some(Secret::new(API_KEY)),
                app_identifier: None,
                signing_secret: Some(Secret::new(SIGNING_SECRET)),
            },
            Arc::new(NonceLedger::new("bootstrap", 300_000, 1000)),
            FreshnessConfig::default(),
        );
        let err = handshake
            .handle_at(Err(vec!["x-nonce".to_string()]), T, "c1")
            .unwrap_err();
        assert_eq!(err.http_status_code().as_u16(), 500);
    }

    #[test]
    fn test_missing_headers_is_401() {
        let err = handshake()
            .handle_at(Err(vec!["x-signature".to_string()]), T, "c1")
            .unwrap_err();
        assert!(matches!(err, AuthenticationError::MissingCredentialHeader { .. }));
        assert_eq!(err.http_status_code().as_u16(), 401);
    }

    #[test]
    fn test_freshness_boundary_inclusive() {
        let handshake = handshake();
        assert!(handshake.handle_at(signed(T - 300_000, "n1"), T, "c").is_ok());
        assert!(handshake.handle_at(signed(T + 300_000, "n2"), T, "c").is_ok());

        let stale = handshake
            .handle_at(signed(T - 300_001, "n3"), T, "c")
            .unwrap_err();
        assert!(matches!(stale, AuthenticationError::ExpiredOrFutureTimestamp { .. }));
        // Stale requests are rejected before the nonce is recorded
        assert!(!handshake.ledger().contains_at("n3", T));
    }

    #[test]
    fn test_bad_signature_burns_nonce() {
        let handshake = handshake();
        let mut headers = signed(T, "burned").unwrap();
        headers.signature = SignatureVerifier::sign_bootstrap(b"wrong-key", "app1", &headers.timestamp, "burned");

        let err = handshake.handle_at(Ok(headers), T, "c1").unwrap_err();
        assert!(matches!(err, AuthenticationError::SignatureMismatch { .. }));

        let retry = handshake.handle_at(signed(T, "burned"), T, "c2").unwrap_err();
        assert!(matches!(retry, AuthenticationError::ReplayedNonce { .. }));
    }

    #[test]
    fn test_wrong_app_identifier_rejected() {
        let handshake = handshake();
        let headers = SignatureVerifier::sign_bootstrap_request_at(API_KEY.as_bytes(), "app2", T, "n");
        let err = handshake.handle_at(Ok(headers), T, "c1").unwrap_err();
        assert!(matches!(err, AuthenticationError::SignatureMismatch { .. }));
    }
}
