//! HMAC-SHA256 request signatures
//!
//! Two message compositions share one primitive:
//!
//! * steady-state requests: `HMAC(signing_secret, timestamp ‖ nonce ‖ body)`
//! * bootstrap requests: `HMAC(api_key, app_identifier ‖ timestamp ‖ nonce)`
//!
//! The timestamp is the header string exactly as sent and the body is the raw bytes as
//! received, so the client and server agree bit for bit. Signatures travel hex-encoded.
//! Comparison of MACs is always constant-time.

use actix_web::http::header::HeaderMap;
use ring::{constant_time, hmac};
use uuid::Uuid;

use super::auth_config::FreshnessConfig;
use crate::constants::{HEADER_NONCE, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use crate::edge_node::clock::now_millis;

/// Input that could not be decoded, as opposed to a well-formed but wrong signature
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureFormatError {
    #[error("signature is not valid hex")]
    InvalidHex,
    #[error("timestamp '{0}' is not epoch milliseconds")]
    InvalidTimestamp(String),
}

/// Credential headers carried by every signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialHeaders {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
}

impl CredentialHeaders {
    /// Extract the three credential headers, listing any that are missing or empty
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, Vec<String>> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let timestamp = read(HEADER_TIMESTAMP);
        let nonce = read(HEADER_NONCE);
        let signature = read(HEADER_SIGNATURE);

        match (timestamp, nonce, signature) {
            (Some(timestamp), Some(nonce), Some(signature)) => Ok(Self {
                timestamp,
                nonce,
                signature,
            }),
            (timestamp, nonce, signature) => {
                let mut missing = Vec::new();
                if timestamp.is_none() {
                    missing.push(HEADER_TIMESTAMP.to_string());
                }
                if nonce.is_none() {
                    missing.push(HEADER_NONCE.to_string());
                }
                if signature.is_none() {
                    missing.push(HEADER_SIGNATURE.to_string());
                }
                Err(missing)
            }
        }
    }

    /// Header name/value pairs, for clients building a request
    pub fn to_header_pairs(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_TIMESTAMP, self.timestamp.clone()),
            (HEADER_NONCE, self.nonce.clone()),
            (HEADER_SIGNATURE, self.signature.clone()),
        ]
    }

    /// Parsed timestamp in epoch milliseconds
    pub fn timestamp_ms(&self) -> Result<u64, SignatureFormatError> {
        SignatureVerifier::parse_timestamp(&self.timestamp)
    }
}

/// Stateless HMAC-SHA256 signer and verifier
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// `HMAC-SHA256(secret, timestamp ‖ nonce ‖ body)`, hex-encoded
    pub fn sign(secret: &[u8], timestamp: &str, nonce: &str, body: &[u8]) -> String {
        hex::encode(Self::mac(secret, &[timestamp.as_bytes(), nonce.as_bytes(), body]))
    }

    /// Verify a steady-state signature.
    ///
    /// `Ok(false)` on mismatch; `Err` only when `supplied_hex` cannot be decoded.
    pub fn verify(
        secret: &[u8],
        timestamp: &str,
        nonce: &str,
        body: &[u8],
        supplied_hex: &str,
    ) -> Result<bool, SignatureFormatError> {
        let supplied = Self::decode_signature(supplied_hex)?;
        let expected = Self::mac(secret, &[timestamp.as_bytes(), nonce.as_bytes(), body]);
        Ok(Self::constant_time_eq(&expected, &supplied))
    }

    /// `HMAC-SHA256(api_key, app_identifier ‖ timestamp ‖ nonce)`, hex-encoded
    pub fn sign_bootstrap(api_key: &[u8], app_identifier: &str, timestamp: &str, nonce: &str) -> String {
        hex::encode(Self::mac(
            api_key,
            &[app_identifier.as_bytes(), timestamp.as_bytes(), nonce.as_bytes()],
        ))
    }

    pub fn verify_bootstrap(
        api_key: &[u8],
        app_identifier: &str,
        timestamp: &str,
        nonce: &str,
        supplied_hex: &str,
    ) -> Result<bool, SignatureFormatError> {
        let supplied = Self::decode_signature(supplied_hex)?;
        let expected = Self::mac(
            api_key,
            &[app_identifier.as_bytes(), timestamp.as_bytes(), nonce.as_bytes()],
        );
        Ok(Self::constant_time_eq(&expected, &supplied))
    }

    /// Constant-time equality. Slices of different length compare unequal.
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        constant_time::verify_slices_are_equal(a, b).is_ok()
    }

    /// Build credential headers for a steady-state request sent now with a random nonce
    pub fn sign_request(secret: &[u8], body: &[u8]) -> CredentialHeaders {
        Self::sign_request_at(secret, body, now_millis(), &Uuid::new_v4().to_string())
    }

    pub fn sign_request_at(secret: &[u8], body: &[u8], timestamp_ms: u64, nonce: &str) -> CredentialHeaders {
        let timestamp = timestamp_ms.to_string();
        let signature = Self::sign(secret, &timestamp, nonce, body);
        CredentialHeaders {
            timestamp,
            nonce: nonce.to_string(),
            signature,
        }
    }

    /// Build credential headers for a bootstrap request sent now with a random nonce
    pub fn sign_bootstrap_request(api_key: &[u8], app_identifier: &str) -> CredentialHeaders {
        Self::sign_bootstrap_request_at(
            api_key,
            app_identifier,
            now_millis(),
            &Uuid::new_v4().to_string(),
        )
    }

    pub fn sign_bootstrap_request_at(
        api_key: &[u8],
        app_identifier: &str,
        timestamp_ms: u64,
        nonce: &str,
    ) -> CredentialHeaders {
        let timestamp = timestamp_ms.to_string();
        let signature = Self::sign_bootstrap(api_key, app_identifier, &timestamp, nonce);
        CredentialHeaders {
            timestamp,
            nonce: nonce.to_string(),
            signature,
        }
    }

    pub fn parse_timestamp(raw: &str) -> Result<u64, SignatureFormatError> {
        raw.trim()
            .parse::<u64>()
            .map_err(|_| SignatureFormatError::InvalidTimestamp(raw.to_string()))
    }

    /// Steady-state window: accept `now - timestamp` in `(-max_future_skew, +max_age)`
    pub fn check_request_freshness(
        timestamp_ms: u64,
        now_ms: u64,
        freshness: &FreshnessConfig,
    ) -> Result<(), String> {
        let age = now_ms as i128 - timestamp_ms as i128;
        if age >= freshness.max_age_ms as i128 {
            return Err(format!("timestamp older than {}ms", freshness.max_age_ms));
        }
        if age <= -(freshness.max_future_skew_ms as i128) {
            return Err(format!(
                "timestamp more than {}ms in the future",
                freshness.max_future_skew_ms
            ));
        }
        Ok(())
    }

    /// Bootstrap window: accept `|now - timestamp| <= bootstrap_window`
    pub fn check_bootstrap_freshness(
        timestamp_ms: u64,
        now_ms: u64,
        freshness: &FreshnessConfig,
    ) -> Result<(), String> {
        if now_ms.abs_diff(timestamp_ms) > freshness.bootstrap_window_ms {
            return Err(format!(
                "timestamp outside the {}ms bootstrap window",
                freshness.bootstrap_window_ms
            ));
        }
        Ok(())
    }

    fn mac(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        let key = hmac::Key::new(hmac::HMAC_SHA256, key);
        let mut context = hmac::Context::with_key(&key);
        for part in parts {
            context.update(part);
        }
        context.sign().as_ref().to_vec()
    }

    fn decode_signature(supplied_hex: &str) -> Result<Vec<u8>, SignatureFormatError> {
        hex::decode(supplied_hex.trim()).map_err(|_| SignatureFormatError::InvalidHex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn test_sign_is_deterministic_and_verifies() {
        let body = br#"{"prompt":"hi"}"#;
        let a = SignatureVerifier::sign(SECRET, "1700000000000", "xyz", body);
        let b = SignatureVerifier::sign(SECRET, "1700000000000", "xyz", body);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(
            SignatureVerifier::verify(SECRET, "1700000000000", "xyz", body, &a),
            Ok(true)
        );
    }

    #[test]
    fn test_any_component_change_fails_verification() {
        let body = br#"{"prompt":"hi"}"#;
        let mac = SignatureVerifier::sign(SECRET, "1700000000000", "xyz", body);
        assert_eq!(
            SignatureVerifier::verify(SECRET, "1700000000001", "xyz", body, &mac),
            Ok(false)
        );
        assert_eq!(
            SignatureVerifier::verify(SECRET, "1700000000000", "xyZ", body, &mac),
            Ok(false)
        );
        assert_eq!(
            SignatureVerifier::verify(SECRET, "1700000000000", "xyz", br#"{"prompt": "hi"}"#, &mac),
            Ok(false)
        );
        assert_eq!(
            SignatureVerifier::verify(b"another-secret", "1700000000000", "xyz", body, &mac),
            Ok(false)
        );
    }

    #[test]
    fn test_known_hmac_vector() {
        // RFC 4231 test case 2
        let mac = SignatureVerifier::sign(b"Jefe", "what do ya want ", "for nothing?", b"");
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_bootstrap_composition_differs_from_request() {
        let bootstrap = SignatureVerifier::sign_bootstrap(SECRET, "app1", "1000", "abc");
        let concatenated = SignatureVerifier::sign(SECRET, "app1", "1000", b"abc");
        assert_eq!(bootstrap, concatenated);
        assert_eq!(
            SignatureVerifier::verify_bootstrap(SECRET, "app1", "1000", "abc", &bootstrap),
            Ok(true)
        );
        assert_eq!(
            SignatureVerifier::verify_bootstrap(SECRET, "app2", "1000", "abc", &bootstrap),
            Ok(false)
        );
    }

    #[test]
    fn test_malformed_hex_is_an_error_not_a_mismatch() {
        assert_eq!(
            SignatureVerifier::verify(SECRET, "1", "n", b"", "not-hex!"),
            Err(SignatureFormatError::InvalidHex)
        );
        // Well-formed hex of the wrong length is a plain mismatch
        assert_eq!(SignatureVerifier::verify(SECRET, "1", "n", b"", "abcd"), Ok(false));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(SignatureVerifier::constant_time_eq(b"abc", b"abc"));
        assert!(!SignatureVerifier::constant_time_eq(b"abc", b"abd"));
        assert!(!SignatureVerifier::constant_time_eq(b"abc", b"abcd"));
        assert!(SignatureVerifier::constant_time_eq(b"", b""));
    }

    #[test]
    fn test_request_freshness_boundaries() {
        let freshness = FreshnessConfig::default();
        let now = 10_000_000;
        let ok = |ts| SignatureVerifier::check_request_freshness(ts, now, &freshness).is_ok();

        assert!(ok(now));
        assert!(ok(now - 300_000 + 1));
        assert!(!ok(now - 300_000));
        assert!(!ok(now - 300_000 - 1));
        assert!(ok(now + 30_000 - 1));
        assert!(!ok(now + 30_000));
        assert!(!ok(now + 30_000 + 1));
    }

    #[test]
    fn test_bootstrap_freshness_is_symmetric_and_inclusive() {
        let freshness = FreshnessConfig::default();
        let now = 10_000_000;
        let ok = |ts| SignatureVerifier::check_bootstrap_freshness(ts, now, &freshness).is_ok();

        assert!(ok(now - 300_000));
        assert!(ok(now + 300_000));
        assert!(!ok(now - 300_000 - 1));
        assert!(!ok(now + 300_000 + 1));
    }

    #[test]
    fn test_credential_headers_report_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(HEADER_TIMESTAMP),
            HeaderValue::from_static("1000"),
        );
        headers.insert(
            HeaderName::from_static(HEADER_SIGNATURE),
            HeaderValue::from_static(""),
        );

        let missing = CredentialHeaders::from_headers(&headers).unwrap_err();
        assert_eq!(missing, vec![HEADER_NONCE.to_string(), HEADER_SIGNATURE.to_string()]);

        headers.insert(HeaderName::from_static(HEADER_NONCE), HeaderValue::from_static("n"));
        headers.insert(
            HeaderName::from_static(HEADER_SIGNATURE),
            HeaderValue::from_static("ab"),
        );
        let creds = CredentialHeaders::from_headers(&headers).unwrap();
        assert_eq!(creds.timestamp_ms(), Ok(1000));
    }

    #[test]
    fn test_sign_request_round_trips_through_verify() {
        let creds = SignatureVerifier::sign_request(SECRET, b"payload");
        assert!(uuid::Uuid::parse_str(&creds.nonce).is_ok());
        assert_eq!(
            SignatureVerifier::verify(SECRET, &creds.timestamp, &creds.nonce, b"payload", &creds.signature),
            Ok(true)
        );
    }
}
