//! The projection of application config that affects the envoy process.

use crate::config::schema::ApplicationConfig;
use crate::observability::tracing::{TracingError, TracingOptions};

/// Log level used when neither the proxy nor the global level is set.
pub const DEFAULT_LOG_LEVEL: &str = "debug";

/// Settings whose change requires an envoy restart.
///
/// Two configs that project to equal `ServerOptions` never cause a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    pub services: String,
    pub log_level: String,
    pub tracing: TracingOptions,
}

impl ServerOptions {
    /// Project an application config. Fails only on invalid tracing options.
    pub fn from_config(config: &ApplicationConfig) -> Result<Self, TracingError> {
        Ok(Self {
            services: config.services.clone(),
            log_level: effective_log_level(config),
            tracing: TracingOptions::from_config(config)?,
        })
    }
}

/// Envoy's log level: `proxy_log_level`, else `log_level`, else debug.
pub fn effective_log_level(config: &ApplicationConfig) -> String {
    [config.proxy_log_level.as_deref(), Some(config.log_level.as_str())]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|level| !level.is_empty())
        .unwrap_or(DEFAULT_LOG_LEVEL)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_fallback_chain() {
        let mut config = ApplicationConfig::default();
        config.log_level = "warn".into();
        assert_eq!(effective_log_level(&config), "warn");

        config.proxy_log_level = Some("trace".into());
        assert_eq!(effective_log_level(&config), "trace");

        config.proxy_log_level = Some(String::new());
        config.log_level = String::new();
        assert_eq!(effective_log_level(&config), "debug");
    }

    #[test]
    fn test_irrelevant_changes_project_equal() {
        let a = ApplicationConfig::default();
        let mut b = a.clone();
        b.envoy_admin.profile_path = "/var/tmp/other.prof".into();
        b.observability.metrics_enabled = false;
        b.tracing.zipkin_endpoint = Some("http://unused".into());

        assert_eq!(
            ServerOptions::from_config(&a).unwrap(),
            ServerOptions::from_config(&b).unwrap()
        );
    }

    #[test]
    fn test_relevant_changes_project_different() {
        let a = ApplicationConfig::default();
        let mut b = a.clone();
        b.services = "proxy".into();
        assert_ne!(
            ServerOptions::from_config(&a).unwrap(),
            ServerOptions::from_config(&b).unwrap()
        );
    }

    #[test]
    fn test_invalid_tracing_fails_projection() {
        let mut config = ApplicationConfig::default();
        config.tracing.provider = "carrier-pigeon".into();
        assert!(ServerOptions::from_config(&config).is_err());
    }
}
