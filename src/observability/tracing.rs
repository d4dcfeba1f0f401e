//! Distributed tracing options.
//!
//! # Responsibilities
//! - Parse the configured tracing provider
//! - Validate provider-specific endpoints
//! - Produce a comparable `TracingOptions` value for change detection
//!
//! # Design Decisions
//! - Only fields relevant to the active provider are retained, so churn in
//!   unrelated tracing settings does not look like a change
//! - Datadog is the only provider that requires a local collector cluster
//!   in the envoy bootstrap

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ApplicationConfig;
use crate::observability::service::service_name;

/// Supported tracing backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingProvider {
    #[default]
    None,
    Jaeger,
    Zipkin,
    Datadog,
}

impl TracingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            TracingProvider::None => "none",
            TracingProvider::Jaeger => "jaeger",
            TracingProvider::Zipkin => "zipkin",
            TracingProvider::Datadog => "datadog",
        }
    }

    /// True if envoy needs a static cluster for a local collector sidecar.
    pub fn requires_local_collector(&self) -> bool {
        matches!(self, TracingProvider::Datadog)
    }
}

impl fmt::Display for TracingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TracingProvider {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(TracingProvider::None),
            "jaeger" => Ok(TracingProvider::Jaeger),
            "zipkin" => Ok(TracingProvider::Zipkin),
            "datadog" => Ok(TracingProvider::Datadog),
            _ => Err(TracingError::UnknownProvider(s.to_string())),
        }
    }
}

/// Errors produced while deriving tracing options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TracingError {
    #[error("invalid tracing provider: {0}")]
    UnknownProvider(String),

    #[error("invalid {field} url '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("zipkin tracing requires an endpoint")]
    MissingZipkinEndpoint,
}

/// Tracing settings that affect the envoy process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TracingOptions {
    pub provider: TracingProvider,
    pub service: String,
    pub sample_rate: f64,
    pub datadog_address: Option<String>,
    pub jaeger_collector_endpoint: Option<Url>,
    pub jaeger_agent_endpoint: Option<String>,
    pub zipkin_endpoint: Option<Url>,
}

impl TracingOptions {
    /// Derive tracing options from an application config.
    pub fn from_config(config: &ApplicationConfig) -> Result<Self, TracingError> {
        let tracing = &config.tracing;
        let provider: TracingProvider = tracing.provider.parse()?;

        let mut options = TracingOptions {
            provider,
            service: service_name(&config.services),
            sample_rate: tracing.sample_rate,
            ..Default::default()
        };

        match provider {
            TracingProvider::None => {}
            TracingProvider::Datadog => {
                options.datadog_address = non_empty(&tracing.datadog_address);
            }
            TracingProvider::Jaeger => {
                options.jaeger_collector_endpoint = non_empty(&tracing.jaeger_collector_endpoint)
                    .map(|raw| parse_url("jaeger_collector_endpoint", &raw))
                    .transpose()?;
                options.jaeger_agent_endpoint = non_empty(&tracing.jaeger_agent_endpoint);
            }
            TracingProvider::Zipkin => {
                let raw = non_empty(&tracing.zipkin_endpoint)
                    .ok_or(TracingError::MissingZipkinEndpoint)?;
                options.zipkin_endpoint = Some(parse_url("zipkin_endpoint", &raw)?);
            }
        }

        Ok(options)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, TracingError> {
    Url::parse(raw).map_err(|e| TracingError::InvalidUrl {
        field,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("".parse::<TracingProvider>().unwrap(), TracingProvider::None);
        assert_eq!("Datadog".parse::<TracingProvider>().unwrap(), TracingProvider::Datadog);
        assert!("honeycomb".parse::<TracingProvider>().is_err());
    }

    #[test]
    fn test_unrelated_fields_are_dropped() {
        let mut config = ApplicationConfig::default();
        config.tracing.datadog_address = Some("10.0.0.1:8126".into());
        let a = TracingOptions::from_config(&config).unwrap();

        config.tracing.datadog_address = Some("10.0.0.2:8126".into());
        let b = TracingOptions::from_config(&config).unwrap();

        assert_eq!(a, b);
        assert!(a.datadog_address.is_none());
    }

    #[test]
    fn test_datadog_keeps_address() {
        let mut config = ApplicationConfig::default();
        config.tracing.provider = "datadog".into();
        config.tracing.datadog_address = Some(" 10.0.0.1:8126 ".into());
        let options = TracingOptions::from_config(&config).unwrap();
        assert_eq!(options.datadog_address.as_deref(), Some("10.0.0.1:8126"));
        assert!(options.provider.requires_local_collector());
    }

    #[test]
    fn test_jaeger_rejects_bad_collector_url() {
        let mut config = ApplicationConfig::default();
        config.tracing.provider = "jaeger".into();
        config.tracing.jaeger_collector_endpoint = Some("not a url".into());
        let err = TracingOptions::from_config(&config).unwrap_err();
        assert!(matches!(err, TracingError::InvalidUrl { field: "jaeger_collector_endpoint", .. }));
    }

    #[test]
    fn test_zipkin_requires_endpoint() {
        let mut config = ApplicationConfig::default();
        config.tracing.provider = "zipkin".into();
        assert_eq!(
            TracingOptions::from_config(&config).unwrap_err(),
            TracingError::MissingZipkinEndpoint
        );

        config.tracing.zipkin_endpoint = Some("http://zipkin:9411/api/v2/spans".into());
        let options = TracingOptions::from_config(&config).unwrap();
        assert_eq!(options.zipkin_endpoint.unwrap().port(), Some(9411));
    }
}
