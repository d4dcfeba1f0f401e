//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sample rate, ports)
//! - Reject unknown services, log levels and tracing providers
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ApplicationConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::ApplicationConfig;
use crate::envoy::bootstrap::parse_address;
use crate::observability::tracing::TracingProvider;

/// Services a supervisor can be asked to run.
pub const KNOWN_SERVICES: &[&str] = &["all", "authenticate", "authorize", "proxy", "databroker"];

/// Log levels accepted for both the supervisor and envoy.
pub const KNOWN_LOG_LEVELS: &[&str] = &[
    "trace", "debug", "info", "warn", "warning", "error", "critical", "off",
];

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("unknown {field} '{value}'")]
    UnknownLogLevel { field: &'static str, value: String },

    #[error("unknown tracing provider '{0}'")]
    UnknownTracingProvider(String),

    #[error("tracing sample rate {0} is outside [0, 1]")]
    SampleRate(String),

    #[error("invalid envoy admin address '{address}': {reason}")]
    AdminAddress { address: String, reason: String },
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ApplicationConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for service in config.services.split(',').map(str::trim) {
        if !KNOWN_SERVICES.contains(&service) {
            errors.push(ValidationError::UnknownService(service.to_string()));
        }
    }

    check_level("log_level", &config.log_level, &mut errors);
    if let Some(level) = config.proxy_log_level.as_deref().filter(|l| !l.is_empty()) {
        check_level("proxy_log_level", level, &mut errors);
    }

    if config.tracing.provider.parse::<TracingProvider>().is_err() {
        errors.push(ValidationError::UnknownTracingProvider(
            config.tracing.provider.clone(),
        ));
    }

    let rate = config.tracing.sample_rate;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::SampleRate(rate.to_string()));
    }

    if let Err(e) = parse_address(&config.envoy_admin.address) {
        errors.push(ValidationError::AdminAddress {
            address: config.envoy_admin.address.clone(),
            reason: e.to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_level(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if !KNOWN_LOG_LEVELS.contains(&value.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::UnknownLogLevel {
            field,
            value: value.to_string(),
        });
    }
}
