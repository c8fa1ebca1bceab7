//! Rejection types produced by the gates and their HTTP rendering
//!
//! Every gate failure is an [`AuthenticationError`]. Rendering is centralised in
//! [`CustomAuthError`] so each rejection path produces the same JSON shape:
//! `{ "error": <message>, "code": <code>, "correlation_id": <id> }`.

use crate::security_types::Severity;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};

use super::auth_config::ResponseSecurityConfig;

/// Gate rejection with a per-request correlation id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AuthenticationError {
    /// One or more of the credential headers is absent
    MissingCredentialHeader {
        missing: Vec<String>,
        correlation_id: String,
    },
    /// A secret, key or identifier the gate depends on is not configured
    ServerMisconfigured {
        reason: String,
        correlation_id: String,
    },
    /// Timestamp outside the accepted freshness window
    ExpiredOrFutureTimestamp {
        timestamp: u64,
        current_time: u64,
        reason: String,
        correlation_id: String,
    },
    /// Nonce already observed inside the replay window
    ReplayedNonce {
        nonce_fingerprint: String,
        correlation_id: String,
    },
    /// Supplied MAC does not match the recomputed MAC
    SignatureMismatch { correlation_id: String },
    /// Signature or timestamp could not be decoded
    MalformedSignature {
        reason: String,
        correlation_id: String,
    },
    /// Identity-bearing route called without `Authorization: Bearer`
    MissingBearerToken { correlation_id: String },
    /// The identity provider reports the token as expired
    TokenExpired { correlation_id: String },
    /// The identity provider rejected the token or could not be reached
    TokenInvalid {
        reason: String,
        correlation_id: String,
    },
    /// Rate limit exceeded for the caller's key
    RateLimited {
        limit: u64,
        window_ms: u64,
        reset_at_ms: u64,
        correlation_id: String,
    },
    /// Actor is inside its escalation block period
    SuspiciousActorBlocked {
        actor: String,
        correlation_id: String,
    },
    /// Request body exceeds the buffering limit of the signature guard
    PayloadTooLarge {
        limit_bytes: usize,
        correlation_id: String,
    },
}

impl AuthenticationError {
    pub fn correlation_id(&self) -> &str {
        match self {
            Self::MissingCredentialHeader { correlation_id, .. }
            | Self::ServerMisconfigured { correlation_id, .. }
            | Self::ExpiredOrFutureTimestamp { correlation_id, .. }
            | Self::ReplayedNonce { correlation_id, .. }
            | Self::SignatureMismatch { correlation_id }
            | Self::MalformedSignature { correlation_id, .. }
            | Self::MissingBearerToken { correlation_id }
            | Self::TokenExpired { correlation_id }
            | Self::TokenInvalid { correlation_id, .. }
            | Self::RateLimited { correlation_id, .. }
            | Self::SuspiciousActorBlocked { correlation_id, .. }
            | Self::PayloadTooLarge { correlation_id, .. } => correlation_id,
        }
    }

    pub fn http_status_code(&self) -> StatusCode {
        match self {
            Self::ServerMisconfigured { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::SuspiciousActorBlocked { .. } => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredentialHeader { .. } => "MISSING_CREDENTIALS",
            Self::ServerMisconfigured { .. } => "SERVER_MISCONFIGURED",
            Self::ExpiredOrFutureTimestamp { .. } => "TIMESTAMP_OUT_OF_WINDOW",
            Self::ReplayedNonce { .. } => "NONCE_REUSED",
            Self::SignatureMismatch { .. } => "INVALID_SIGNATURE",
            Self::MalformedSignature { .. } => "MALFORMED_SIGNATURE",
            Self::MissingBearerToken { .. } => "MISSING_TOKEN",
            Self::TokenExpired { .. } => "TOKEN_EXPIRED",
            Self::TokenInvalid { .. } => "INVALID_TOKEN",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SuspiciousActorBlocked { .. } => "SUSPICIOUS_ACTOR",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
        }
    }

    /// Message safe to return to any caller. Never names a secret.
    pub fn public_message(&self) -> String {
        match self {
            Self::MissingCredentialHeader { .. } => "Missing authentication headers".to_string(),
            Self::ServerMisconfigured { .. } => "Internal server error".to_string(),
            Self::ExpiredOrFutureTimestamp { .. } => "Request expired".to_string(),
            Self::ReplayedNonce { .. } => "Nonce already used".to_string(),
            Self::SignatureMismatch { .. } => "Invalid signature".to_string(),
            Self::MalformedSignature { .. } => "Malformed signature".to_string(),
            Self::MissingBearerToken { .. } => "Missing bearer token".to_string(),
            Self::TokenExpired { .. } => "Token expired".to_string(),
            Self::TokenInvalid { .. } => "Invalid token".to_string(),
            Self::RateLimited {
                limit, window_ms, ..
            } => format!(
                "Too many requests: limit of {} requests per {} exceeded",
                limit,
                describe_window(*window_ms)
            ),
            Self::SuspiciousActorBlocked { .. } => String::new(),
            Self::PayloadTooLarge { limit_bytes, .. } => {
                format!("Request body exceeds {} bytes", limit_bytes)
            }
        }
    }

    /// Get specific troubleshooting guidance for each error type
    pub fn troubleshooting(&self) -> String {
        match self {
            Self::MissingCredentialHeader { missing, .. } => format!(
                "Missing headers: {}. Every signed request carries x-timestamp, x-nonce and x-signature.",
                missing.join(", ")
            ),
            Self::ServerMisconfigured { .. } => {
                "Server-side issue. Provide the correlation id to the operator.".to_string()
            }
            Self::ExpiredOrFutureTimestamp {
                timestamp,
                current_time,
                reason,
                ..
            } => format!(
                "Timestamp error: {} (request: {}, server: {}). Send epoch milliseconds and keep the device clock synchronised.",
                reason, timestamp, current_time
            ),
            Self::ReplayedNonce { .. } => {
                "Generate a new random nonce for every request.".to_string()
            }
            Self::SignatureMismatch { .. } => {
                "Sign timestamp, nonce and the exact body bytes sent, hex-encoded HMAC-SHA256."
                    .to_string()
            }
            Self::MalformedSignature { reason, .. } => format!("Decoding error: {}", reason),
            Self::MissingBearerToken { .. } => {
                "Send 'Authorization: Bearer <token>' on identity-bearing routes.".to_string()
            }
            Self::TokenExpired { .. } => {
                "Refresh the identity token and retry.".to_string()
            }
            Self::TokenInvalid { reason, .. } => format!("Token rejected: {}", reason),
            Self::RateLimited { reset_at_ms, .. } => format!(
                "Back off until {} (epoch ms), see X-RateLimit-Reset.",
                reset_at_ms
            ),
            Self::SuspiciousActorBlocked { .. } => String::new(),
            Self::PayloadTooLarge { .. } => "Reduce the request body size.".to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingCredentialHeader { .. } | Self::MissingBearerToken { .. } => {
                Severity::Info
            }
            Self::TokenExpired { .. } => Severity::Info,
            Self::ExpiredOrFutureTimestamp { .. }
            | Self::SignatureMismatch { .. }
            | Self::MalformedSignature { .. }
            | Self::TokenInvalid { .. }
            | Self::RateLimited { .. }
            | Self::PayloadTooLarge { .. } => Severity::Warning,
            Self::ReplayedNonce { .. } => Severity::Error,
            Self::ServerMisconfigured { .. } | Self::SuspiciousActorBlocked { .. } => {
                Severity::Critical
            }
        }
    }

    /// Operational incident rather than client error
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::ServerMisconfigured { .. })
    }

    /// Render the JSON body for this rejection
    pub fn to_error_response(&self, response: &ResponseSecurityConfig) -> ErrorResponse {
        let details = if response.detailed_error_messages && !self.is_operational() {
            Some(ErrorDetails {
                error_type: self.variant_name().to_string(),
                troubleshooting: self.troubleshooting(),
            })
        } else {
            None
        };

        ErrorResponse {
            error: self.public_message(),
            code: Some(self.error_code().to_string()),
            correlation_id: if response.include_correlation_id {
                Some(self.correlation_id().to_string())
            } else {
                None
            },
            details,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            Self::MissingCredentialHeader { .. } => "MissingCredentialHeader",
            Self::ServerMisconfigured { .. } => "ServerMisconfigured",
            Self::ExpiredOrFutureTimestamp { .. } => "ExpiredOrFutureTimestamp",
            Self::ReplayedNonce { .. } => "ReplayedNonce",
            Self::SignatureMismatch { .. } => "SignatureMismatch",
            Self::MalformedSignature { .. } => "MalformedSignature",
            Self::MissingBearerToken { .. } => "MissingBearerToken",
            Self::TokenExpired { .. } => "TokenExpired",
            Self::TokenInvalid { .. } => "TokenInvalid",
            Self::RateLimited { .. } => "RateLimited",
            Self::SuspiciousActorBlocked { .. } => "SuspiciousActorBlocked",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
        }
    }
}

fn describe_window(window_ms: u64) -> String {
    match window_ms {
        ms if ms % 3_600_000 == 0 => format!("{} hour(s)", ms / 3_600_000),
        ms if ms % 60_000 == 0 => format!("{} minute(s)", ms / 60_000),
        ms if ms % 1_000 == 0 => format!("{} second(s)", ms / 1_000),
        ms => format!("{} ms", ms),
    }
}

impl std::fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredentialHeader { missing, correlation_id } => write!(
                f,
                "Missing required headers: {} (correlation_id: {})",
                missing.join(", "),
                correlation_id
            ),
            Self::ServerMisconfigured { reason, correlation_id } => write!(
                f,
                "Server misconfigured: {} (correlation_id: {})",
                reason, correlation_id
            ),
            Self::ExpiredOrFutureTimestamp {
                timestamp,
                current_time,
                reason,
                correlation_id,
            } => write!(
                f,
                "Timestamp validation failed: {} at {} (current: {}) (correlation_id: {})",
                reason, timestamp, current_time, correlation_id
            ),
            Self::ReplayedNonce {
                nonce_fingerprint,
                correlation_id,
            } => write!(
                f,
                "Replayed nonce {} (correlation_id: {})",
                nonce_fingerprint, correlation_id
            ),
            Self::SignatureMismatch { correlation_id } => {
                write!(f, "Signature mismatch (correlation_id: {})", correlation_id)
            }
            Self::MalformedSignature { reason, correlation_id } => write!(
                f,
                "Malformed signature: {} (correlation_id: {})",
                reason, correlation_id
            ),
            Self::MissingBearerToken { correlation_id } => {
                write!(f, "Missing bearer token (correlation_id: {})", correlation_id)
            }
            Self::TokenExpired { correlation_id } => {
                write!(f, "Token expired (correlation_id: {})", correlation_id)
            }
            Self::TokenInvalid { reason, correlation_id } => write!(
                f,
                "Token invalid: {} (correlation_id: {})",
                reason, correlation_id
            ),
            Self::RateLimited {
                limit,
                window_ms,
                correlation_id,
                ..
            } => write!(
                f,
                "Rate limit of {} per {}ms exceeded (correlation_id: {})",
                limit, window_ms, correlation_id
            ),
            Self::SuspiciousActorBlocked { actor, correlation_id } => write!(
                f,
                "Blocked suspicious actor {} (correlation_id: {})",
                actor, correlation_id
            ),
            Self::PayloadTooLarge {
                limit_bytes,
                correlation_id,
            } => write!(
                f,
                "Payload larger than {} bytes (correlation_id: {})",
                limit_bytes, correlation_id
            ),
        }
    }
}

impl std::error::Error for AuthenticationError {}

/// JSON body of a rejection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
}

/// Detailed error information for development environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub error_type: String,
    pub troubleshooting: String,
}

/// Authentication failure that implements `ResponseError`
#[derive(Debug)]
pub struct CustomAuthError {
    pub auth_error: AuthenticationError,
    pub body: ErrorResponse,
    /// Extra response headers, e.g. rate-limit state on a 429
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl CustomAuthError {
    pub fn new(auth_error: AuthenticationError, response: &ResponseSecurityConfig) -> Self {
        let body = auth_error.to_error_response(response);
        Self {
            auth_error,
            body,
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        self.headers = headers;
        self
    }
}

impl std::fmt::Display for CustomAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.auth_error)
    }
}

impl actix_web::ResponseError for CustomAuthError {
    fn status_code(&self) -> StatusCode {
        self.auth_error.http_status_code()
    }

    fn error_response(&self) -> HttpResponse {
        // Blocked actors get no body and the connection is closed after the response
        if let AuthenticationError::SuspiciousActorBlocked { .. } = self.auth_error {
            return HttpResponse::build(StatusCode::FORBIDDEN)
                .force_close()
                .finish();
        }

        let mut builder = HttpResponse::build(self.status_code());
        for (name, value) in &self.headers {
            builder.insert_header((name.clone(), value.clone()));
        }
        builder.json(&self.body)
    }
}
