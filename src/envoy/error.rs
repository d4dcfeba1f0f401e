//! Envoy supervisor error definitions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::envoy::bootstrap::BootstrapError;
use crate::observability::tracing::TracingError;

/// Errors that can occur while supervising envoy.
#[derive(Debug, Error)]
pub enum EnvoyError {
    /// The working directory could not be created.
    #[error("error creating working directory {path:?} for envoy: {source}")]
    WorkingDirectory { path: PathBuf, source: io::Error },

    /// No executable could be located.
    #[error("no envoy binary found: {0}")]
    BinaryNotFound(String),

    /// The binary could not be read for verification.
    #[error("error reading envoy binary {path:?} for checksum verification: {source}")]
    ChecksumRead { path: PathBuf, source: io::Error },

    /// The binary's hash does not match the trusted value.
    #[error("invalid envoy binary, expected {expected} but got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Construction happened outside a Tokio runtime.
    #[error("envoy supervisor must be created inside a tokio runtime")]
    NoRuntime,

    /// Tracing options derived from config were invalid.
    #[error("invalid tracing config: {0}")]
    Tracing(#[from] TracingError),

    /// The bootstrap document could not be built.
    #[error("failed to build envoy bootstrap: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// The bootstrap document could not be written.
    #[error("failed to write envoy config to {path:?}: {source}")]
    WriteConfig { path: PathBuf, source: io::Error },

    /// The child process could not be started.
    #[error("error starting envoy: {0}")]
    Spawn(io::Error),

    /// The child process could not be killed.
    #[error("failed to kill envoy process: {0}")]
    Kill(io::Error),

    /// The supervisor has been closed.
    #[error("envoy supervisor is closed")]
    Closed,
}

/// Convenience alias for supervisor results.
pub type EnvoyResult<T> = Result<T, EnvoyError>;
