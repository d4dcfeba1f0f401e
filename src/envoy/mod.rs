//! Envoy Supervision Subsystem
//!
//! Runs envoy as a child process and keeps it in step with the
//! application configuration.
//!
//! # Data Flow
//! ```text
//! ConfigSource ──▶ Server::on_config_change
//!                     │ ServerOptions unchanged? ──▶ no-op
//!                     ▼
//!                  build_bootstrap ──▶ envoy-config.json (atomic replace)
//!                     ▼
//!                  spawn next generation ──▶ release previous
//!                     │
//!                     ├──▶ LogRelay (stdout, stderr)
//!                     └──▶ process collector (pid lookup every tick)
//! ```
//!
//! # Design Decisions
//! - The binary is verified once at construction; a mismatch is fatal
//! - Hot reload never kills the previous generation, envoy drains it
//! - A rejected config leaves the running generation alone

pub mod binary;
pub mod bootstrap;
pub mod collector;
pub mod error;
pub mod logs;
pub mod options;
pub mod process;
pub mod server;

pub use error::{EnvoyError, EnvoyResult};
pub use options::ServerOptions;
pub use server::{Phase, ReloadOutcome, Server, ServerSettings};
