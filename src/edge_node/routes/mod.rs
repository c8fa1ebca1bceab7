//! HTTP route handlers for the edge node

pub mod ai_routes;
pub mod bootstrap_routes;
pub mod system_routes;
