use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::edge_node::auth::{
    CredentialHeaders, CustomAuthError, SecurityEvent, SecurityEventType,
};
use crate::edge_node::http_server::AppState;
use crate::security_types::Severity;

/// Exchange a bootstrap proof for the sealed signing secret
///
/// Expects `x-timestamp`, `x-nonce` and `x-signature`, the latter an HMAC over
/// `app_identifier ‖ timestamp ‖ nonce` keyed by the static API key. Responds with
/// `{ "encryptedSecret": ... }`.
pub async fn bootstrap(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, CustomAuthError> {
    let correlation_id = Uuid::new_v4().to_string();
    let logger = &state.security_logger;
    let client = logger.client_info(&req, state.trust_forwarded_for);

    match state
        .handshake
        .handle(CredentialHeaders::from_headers(req.headers()), &correlation_id)
    {
        Ok(response) => {
            let event = SecurityEvent::new(
                SecurityEventType::SecretIssued,
                Severity::Info,
                "bootstrap",
                &correlation_id,
                "sealed signing secret issued",
            )
            .with_request(&req, client);
            logger.log_security_event(&event);
            Ok(HttpResponse::Ok().json(response))
        }
        Err(error) => {
            let event = SecurityEvent::from_rejection("bootstrap", &error).with_request(&req, client);
            logger.log_security_event(&event);
            Err(CustomAuthError::new(
                error,
                &state.guard_config.response_security,
            ))
        }
    }
}
