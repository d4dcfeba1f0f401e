//! Envoy supervisor and bootstrap generator.
//!
//! Locates and verifies an envoy binary, renders its bootstrap document from
//! the live application config, hot-reloads it on relevant changes, relays its
//! logs and samples its resource usage.

pub mod config;
pub mod envoy;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ApplicationConfig;
pub use envoy::{Server, ServerSettings};
pub use lifecycle::Shutdown;
