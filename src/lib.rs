//! # edgeguard
//!
//! Edge trust layer that sits in front of proxied AI-provider endpoints. Every inbound
//! request passes a fixed sequence of gates:
//!
//! 1. the request signature guard (HMAC-SHA256 over timestamp, nonce and raw body, with
//!    replay protection and an asymmetric freshness window),
//! 2. the federated token cache for identity-bearing routes,
//! 3. the rate limiter with suspicious-actor escalation.
//!
//! A separate bootstrap handshake hands a verified device the deployment signing secret,
//! sealed under the static API key.

pub mod constants;
pub mod edge_node;
pub mod error;
pub mod logging;
pub mod security_types;

pub use edge_node::{EdgeHttpServer, EdgeNodeConfig};
pub use error::{GuardError, GuardResult};
