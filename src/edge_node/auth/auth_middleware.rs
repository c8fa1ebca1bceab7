//! Request signature guard and its Actix-Web middleware
//!
//! Every steady-state request carries `x-timestamp`, `x-nonce` and `x-signature`. The guard
//! checks, in order: signing secret configured, headers present, nonce unseen, timestamp
//! fresh, MAC correct. The nonce is consumed before the MAC is checked, so a request with
//! a bad signature still burns its nonce.

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::error::PayloadError;
use actix_web::web::{Bytes, BytesMut};
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use futures_util::StreamExt;
use log::{debug, error, warn};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

use super::auth_config::{FreshnessConfig, GuardConfig, ResponseSecurityConfig};
use super::auth_errors::{AuthenticationError, CustomAuthError};
use super::auth_types::{log_fingerprint, AuthenticatedDevice, NonceLedger, NonceOutcome};
use super::security_logging::{SecurityEvent, SecurityEventType, SecurityLogger};
use super::signature_verification::{CredentialHeaders, SignatureFormatError, SignatureVerifier};
use crate::constants::HEADER_DEVICE_ID;
use crate::edge_node::clock::now_millis;
use crate::edge_node::config::Secret;
use crate::security_types::Severity;

/// Steady-state gate: signature, replay and freshness checks
pub struct RequestSignatureGuard {
    signing_secret: Option<Secret>,
    ledger: Arc<NonceLedger>,
    freshness: FreshnessConfig,
    response_security: ResponseSecurityConfig,
    security_logger: SecurityLogger,
    trust_forwarded_for: bool,
}

impl RequestSignatureGuard {
    pub fn new(
        signing_secret: Option<Secret>,
        ledger: Arc<NonceLedger>,
        config: &GuardConfig,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            signing_secret,
            ledger,
            freshness: config.freshness.clone(),
            response_security: config.response_security.clone(),
            security_logger: SecurityLogger::new(config.security_logging.clone()),
            trust_forwarded_for,
        }
    }

    pub fn ledger(&self) -> &Arc<NonceLedger> {
        &self.ledger
    }

    pub fn max_body_bytes(&self) -> usize {
        self.freshness.max_body_bytes
    }

    pub fn verify(
        &self,
        headers: Result<CredentialHeaders, Vec<String>>,
        body: &[u8],
        correlation_id: &str,
    ) -> Result<AuthenticatedDevice, AuthenticationError> {
        self.verify_at(headers, body, now_millis(), correlation_id)
    }

    /// Run every check against `body` as received, at `now_ms`
    pub fn verify_at(
        &self,
        headers: Result<CredentialHeaders, Vec<String>>,
        body: &[u8],
        now_ms: u64,
        correlation_id: &str,
    ) -> Result<AuthenticatedDevice, AuthenticationError> {
        let secret = self.signing_secret.as_ref().ok_or_else(|| {
            error!(
                "Signing secret not configured, rejecting signed request (correlation_id: {})",
                correlation_id
            );
            AuthenticationError::ServerMisconfigured {
                reason: "signing secret not configured".to_string(),
                correlation_id: correlation_id.to_string(),
            }
        })?;

        let headers = headers.map_err(|missing| AuthenticationError::MissingCredentialHeader {
            missing,
            correlation_id: correlation_id.to_string(),
        })?;

        let nonce_fingerprint = log_fingerprint(&headers.nonce);
        if self.ledger.observe_at(&headers.nonce, now_ms) != NonceOutcome::Fresh {
            return Err(AuthenticationError::ReplayedNonce {
                nonce_fingerprint,
                correlation_id: correlation_id.to_string(),
            });
        }

        let timestamp_ms = headers
            .timestamp_ms()
            .map_err(|e| malformed(e, correlation_id))?;
        SignatureVerifier::check_request_freshness(timestamp_ms, now_ms, &self.freshness).map_err(
            |reason| AuthenticationError::ExpiredOrFutureTimestamp {
                timestamp: timestamp_ms,
                current_time: now_ms,
                reason,
                correlation_id: correlation_id.to_string(),
            },
        )?;

        let verified = SignatureVerifier::verify(
            secret.as_bytes(),
            &headers.timestamp,
            &headers.nonce,
            body,
            &headers.signature,
        )
        .map_err(|e| malformed(e, correlation_id))?;
        if !verified {
            return Err(AuthenticationError::SignatureMismatch {
                correlation_id: correlation_id.to_string(),
            });
        }

        Ok(AuthenticatedDevice {
            device_id: None,
            timestamp_ms,
            nonce_fingerprint,
        })
    }

    fn reject(&self, req: ServiceRequest, error: AuthenticationError) -> ServiceResponse {
        if error.is_operational() {
            error!("Signature guard failure on {}: {}", req.path(), error);
        } else {
            warn!("Signature guard rejected {}: {}", req.path(), error);
        }

        let client = self
            .security_logger
            .client_info(req.request(), self.trust_forwarded_for);
        let event = SecurityEvent::from_rejection("signature_guard", &error)
            .with_request(req.request(), client);
        self.security_logger.log_security_event(&event);

        req.error_response(CustomAuthError::new(error, &self.response_security))
    }

    fn record_success(&self, req: &ServiceRequest, device: &AuthenticatedDevice, correlation_id: &str) {
        debug!(
            "Verified signed request on {} (nonce {})",
            req.path(),
            device.nonce_fingerprint
        );
        let client = self
            .security_logger
            .client_info(req.request(), self.trust_forwarded_for);
        let event = SecurityEvent::new(
            SecurityEventType::AuthenticationSuccess,
            Severity::Info,
            "signature_guard",
            correlation_id,
            "signature verified",
        )
        .with_request(req.request(), client);
        self.security_logger.log_security_event(&event);
    }
}

fn malformed(error: SignatureFormatError, correlation_id: &str) -> AuthenticationError {
    AuthenticationError::MalformedSignature {
        reason: error.to_string(),
        correlation_id: correlation_id.to_string(),
    }
}

/// Paths that never carry request signatures
pub fn should_skip_verification(path: &str) -> bool {
    const SKIP_PATHS: &[&str] = &["/api/system/status", "/api/auth/bootstrap"];
    SKIP_PATHS.contains(&path)
}

/// Buffer the request body up to `limit` bytes
async fn read_body(payload: &mut Payload, limit: usize) -> Result<Option<Bytes>, PayloadError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(Some(body.freeze()))
}

/// Hand the buffered body back to downstream extractors
fn restore_payload(req: &mut ServiceRequest, body: Bytes) {
    let stream = futures_util::stream::once(async move { Ok::<_, PayloadError>(body) });
    req.set_payload(Payload::Stream {
        payload: Box::pin(stream),
    });
}

/// Actix-Web middleware applying [`RequestSignatureGuard`]
pub struct SignatureGuardMiddleware {
    guard: Arc<RequestSignatureGuard>,
}

impl SignatureGuardMiddleware {
    pub fn new(guard: Arc<RequestSignatureGuard>) -> Self {
        Self { guard }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SignatureGuardMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = SignatureGuardService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(SignatureGuardService {
            service: Rc::new(service),
            guard: Arc::clone(&self.guard),
        }))
    }
}

pub struct SignatureGuardService<S> {
    service: Rc<S>,
    guard: Arc<RequestSignatureGuard>,
}

impl<S, B> Service<ServiceRequest> for SignatureGuardService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let guard = Arc::clone(&self.guard);

        Box::pin(async move {
            if should_skip_verification(req.path()) {
                debug!("Skipping signature verification for path: {}", req.path());
                return service.call(req).await.map(ServiceResponse::map_into_left_body);
            }

            let correlation_id = Uuid::new_v4().to_string();
            let limit = guard.max_body_bytes();

            let mut payload = req.take_payload();
            let body = match read_body(&mut payload, limit).await? {
                Some(body) => body,
                None => {
                    let error = AuthenticationError::PayloadTooLarge {
                        limit_bytes: limit,
                        correlation_id,
                    };
                    return Ok(guard.reject(req, error).map_into_right_body());
                }
            };

            let headers = CredentialHeaders::from_headers(req.headers());
            match guard.verify(headers, &body, &correlation_id) {
                Ok(mut device) => {
                    device.device_id = req
                        .headers()
                        .get(HEADER_DEVICE_ID)
                        .and_then(|h| h.to_str().ok())
                        .map(str::to_string);
                    guard.record_success(&req, &device, &correlation_id);
                    req.extensions_mut().insert(device);
                    restore_payload(&mut req, body);
                    service.call(req).await.map(ServiceResponse::map_into_left_body)
                }
                Err(error) => Ok(guard.reject(req, error).map_into_right_body()),
            }
        })
    }
}
