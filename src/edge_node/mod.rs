//! Edge node: gates, stores, configuration and the HTTP surface

pub mod auth;
pub mod clock;
pub mod config;
pub mod http_server;
pub mod response_cache;
pub mod routes;
pub mod sweeper;

pub use config::{load_node_config, EdgeNodeConfig, IdentityProviderConfig, Secret};
pub use http_server::{configure_routes, AppState, EdgeHttpServer};
pub use response_cache::ResponseCache;
pub use sweeper::{SweepGroup, SweepTask, Sweepable};
