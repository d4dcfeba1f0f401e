//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Supervisor and envoy log relay produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (restart counters, process gauges)
//!
//! Envoy consumes:
//!     → tracing.rs (provider options rendered into the bootstrap)
//!     → service.rs (service name stats tag)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON optional) for machine parsing
//! - Every envoy-related event carries `service = "envoy"`
//! - Metrics go through the `metrics` facade; the exporter is optional

pub mod logging;
pub mod metrics;
pub mod service;
pub mod tracing;
