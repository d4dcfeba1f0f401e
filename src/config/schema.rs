//! Configuration schema definitions.
//!
//! This module defines the application configuration consumed by the
//! supervisor. All types derive Serde traits for deserialization from config
//! files.

use serde::{Deserialize, Serialize};

/// Root application configuration.
///
/// A snapshot is immutable once published by a [`ConfigSource`]; a change is
/// always a whole new snapshot.
///
/// [`ConfigSource`]: crate::config::source::ConfigSource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Active service set (e.g. "all", "proxy", "authorize").
    pub services: String,

    /// Log level for the supervisor itself (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log level passed to envoy. Falls back to `log_level` when unset.
    pub proxy_log_level: Option<String>,

    /// Distributed tracing settings forwarded to envoy.
    pub tracing: TracingConfig,

    /// Envoy admin interface settings.
    pub envoy_admin: EnvoyAdminConfig,

    /// Observability settings for the supervisor process.
    pub observability: ObservabilityConfig,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            services: "all".to_string(),
            log_level: "info".to_string(),
            proxy_log_level: None,
            tracing: TracingConfig::default(),
            envoy_admin: EnvoyAdminConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Tracing provider ("", "jaeger", "zipkin", "datadog").
    pub provider: String,

    /// Probability of sampling a request, in `[0, 1]`.
    pub sample_rate: f64,

    /// Datadog agent address (`host:port`). Defaults to `127.0.0.1:8126`.
    pub datadog_address: Option<String>,

    /// Jaeger collector endpoint URL.
    pub jaeger_collector_endpoint: Option<String>,

    /// Jaeger agent endpoint (`host:port`).
    pub jaeger_agent_endpoint: Option<String>,

    /// Zipkin collector endpoint URL.
    pub zipkin_endpoint: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            sample_rate: 0.0001,
            datadog_address: None,
            jaeger_collector_endpoint: None,
            jaeger_agent_endpoint: None,
            zipkin_endpoint: None,
        }
    }
}

/// Envoy admin interface configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvoyAdminConfig {
    /// Admin bind address (e.g., "127.0.0.1:9901").
    pub address: String,

    /// Path envoy writes admin access logs to.
    pub access_log_path: String,

    /// Path envoy writes CPU profiles to.
    pub profile_path: String,
}

impl Default for EnvoyAdminConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9901".to_string(),
            access_log_path: "/tmp/envoy-admin-access.log".to_string(),
            profile_path: "/tmp/envoy-admin.prof".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Emit logs as JSON instead of human-readable text.
    pub log_json: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_json: false,
            metrics_enabled: true,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ApplicationConfig = toml::from_str("services = \"proxy\"").unwrap();
        assert_eq!(config.services, "proxy");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.envoy_admin.address, "127.0.0.1:9901");
        assert!(config.proxy_log_level.is_none());
        assert!(config.tracing.provider.is_empty());
    }

    #[test]
    fn test_nested_tables() {
        let config: ApplicationConfig = toml::from_str(
            r#"
            proxy_log_level = "warning"

            [tracing]
            provider = "datadog"
            datadog_address = "10.0.0.5:8126"

            [envoy_admin]
            address = "0.0.0.0:9902"
            "#,
        )
        .unwrap();
        assert_eq!(config.proxy_log_level.as_deref(), Some("warning"));
        assert_eq!(config.tracing.provider, "datadog");
        assert_eq!(config.tracing.datadog_address.as_deref(), Some("10.0.0.5:8126"));
        assert_eq!(config.envoy_admin.address, "0.0.0.0:9902");
        assert_eq!(config.envoy_admin.profile_path, "/tmp/envoy-admin.prof");
    }
}
