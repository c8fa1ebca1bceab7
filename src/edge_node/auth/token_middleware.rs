//! Federated token gate
//!
//! Resolves `Authorization: Bearer <token>` through the [`FederatedTokenCache`] and stores
//! the resulting [`VerifiedIdentity`] in the request extensions. Without an identity
//! provider the gate passes every request through unchanged.

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::{Error, HttpMessage};
use futures_util::future::LocalBoxFuture;
use log::{debug, warn};
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

use super::auth_config::{GuardConfig, ResponseSecurityConfig};
use super::auth_errors::{AuthenticationError, CustomAuthError};
use super::auth_types::{log_fingerprint, VerifiedIdentity};
use super::security_logging::{SecurityEvent, SecurityLogger};
use super::token_cache::{Claims, FederatedTokenCache, TokenRejection};

/// Extract the bearer token, if the header carries one
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn rejection_to_error(rejection: TokenRejection, correlation_id: String) -> AuthenticationError {
    match rejection {
        TokenRejection::Expired => AuthenticationError::TokenExpired { correlation_id },
        TokenRejection::Invalid(reason) => AuthenticationError::TokenInvalid {
            reason,
            correlation_id,
        },
    }
}

impl From<Claims> for VerifiedIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
        }
    }
}

/// Actix-Web middleware that resolves federated identity tokens
pub struct FederatedTokenGate {
    cache: Option<Arc<FederatedTokenCache>>,
    required: bool,
    response_security: ResponseSecurityConfig,
    security_logger: Arc<SecurityLogger>,
    trust_forwarded_for: bool,
}

impl FederatedTokenGate {
    /// `cache` is `None` when no identity provider is configured
    pub fn new(
        cache: Option<Arc<FederatedTokenCache>>,
        config: &GuardConfig,
        trust_forwarded_for: bool,
    ) -> Self {
        Self {
            cache,
            required: true,
            response_security: config.response_security.clone(),
            security_logger: Arc::new(SecurityLogger::new(config.security_logging.clone())),
            trust_forwarded_for,
        }
    }

    /// Let requests without a bearer token through as anonymous
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for FederatedTokenGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = FederatedTokenService<S>;
    type InitError = ();
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(FederatedTokenService {
            service: Rc::new(service),
            cache: self.cache.clone(),
            required: self.required,
            response_security: self.response_security.clone(),
            security_logger: Arc::clone(&self.security_logger),
            trust_forwarded_for: self.trust_forwarded_for,
        }))
    }
}

pub struct FederatedTokenService<S> {
    service: Rc<S>,
    cache: Option<Arc<FederatedTokenCache>>,
    required: bool,
    response_security: ResponseSecurityConfig,
    security_logger: Arc<SecurityLogger>,
    trust_forwarded_for: bool,
}

impl<S, B> Service<ServiceRequest> for FederatedTokenService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let cache = self.cache.clone();
        let required = self.required;
        let response_security = self.response_security.clone();
        let logger = Arc::clone(&self.security_logger);
        let trust_forwarded_for = self.trust_forwarded_for;

        Box::pin(async move {
            let Some(cache) = cache else {
                return service.call(req).await.map(ServiceResponse::map_into_left_body);
            };

            let correlation_id = Uuid::new_v4().to_string();
            let token = bearer_token(req.headers()).map(str::to_string);

            let outcome = match token {
                Some(token) => cache
                    .resolve(&token)
                    .await
                    .map(Some)
                    .map_err(|rejection| {
                        debug!("Bearer token {} rejected", log_fingerprint(&token));
                        rejection_to_error(rejection, correlation_id.clone())
                    }),
                None if required => Err(AuthenticationError::MissingBearerToken {
                    correlation_id: correlation_id.clone(),
                }),
                None => Ok(None),
            };

            match outcome {
                Ok(claims) => {
                    if let Some(claims) = claims {
                        req.extensions_mut().insert(VerifiedIdentity::from(claims));
                    }
                    service.call(req).await.map(ServiceResponse::map_into_left_body)
                }
                Err(error) => {
                    warn!("Token gate rejected {}: {}", req.path(), error);
                    let client = logger.client_info(req.request(), trust_forwarded_for);
                    let event = SecurityEvent::from_rejection("token_gate", &error)
                        .with_request(req.request(), client);
                    logger.log_security_event(&event);
                    let response =
                        req.error_response(CustomAuthError::new(error, &response_security));
                    Ok(response.map_into_right_body())
                }
            }
        })
    }
}
