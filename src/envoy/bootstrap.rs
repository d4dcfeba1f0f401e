//! Envoy bootstrap document generation.
//!
//! # Responsibilities
//! - Map application config + server options to envoy's v3 bootstrap schema
//! - Point dynamic resource discovery (delta ADS) at the local control plane
//! - Declare the static clusters envoy needs before discovery starts
//!
//! # Design Decisions
//! - Pure: no I/O, the caller decides where the document goes
//! - Malformed admin address or control-plane port is an error, never
//!   defaulted; a malformed collector override is ignored instead
//! - Field names follow the proto3 JSON mapping (lowerCamelCase) so envoy
//!   accepts the file as-is

use std::time::Duration;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::config::schema::ApplicationConfig;
use crate::envoy::options::ServerOptions;
use crate::observability::service::service_name;

/// Node id and cluster envoy reports to the control plane.
pub const NODE_NAME: &str = "proxy";

/// Static cluster carrying discovery traffic to the control plane.
pub const CONTROL_PLANE_CLUSTER: &str = "control-plane-grpc";

/// Static cluster for the datadog trace agent.
pub const DATADOG_CLUSTER: &str = "datadog-apm";

/// Default datadog trace agent address.
pub const DEFAULT_DATADOG_HOST: &str = "127.0.0.1";
pub const DEFAULT_DATADOG_PORT: u32 = 8126;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors building a bootstrap document.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("invalid control plane port '{port}': {reason}")]
    InvalidControlPlanePort { port: String, reason: String },

    #[error("failed to serialize bootstrap: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Root of envoy's bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    pub node: Node,
    pub admin: Admin,
    pub dynamic_resources: DynamicResources,
    pub static_resources: StaticResources,
    pub stats_config: StatsConfig,
}

impl Bootstrap {
    /// Render the document as JSON bytes.
    pub fn to_json(&self) -> Result<Vec<u8>, BootstrapError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub access_log_path: String,
    pub profile_path: String,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub socket_address: SocketAddress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u32,
}

impl From<SocketAddress> for Address {
    fn from(socket_address: SocketAddress) -> Self {
        Self { socket_address }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicResources {
    pub lds_config: ConfigSource,
    pub cds_config: ConfigSource,
    pub ads_config: ApiConfigSource,
}

/// A config source that defers to the aggregated discovery stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSource {
    pub ads: AggregatedConfigSource,
    pub resource_api_version: ApiVersion,
}

impl ConfigSource {
    fn ads() -> Self {
        Self {
            ads: AggregatedConfigSource {},
            resource_api_version: ApiVersion::V3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedConfigSource {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfigSource {
    pub api_type: ApiType,
    pub transport_api_version: ApiVersion,
    pub grpc_services: Vec<GrpcService>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiType {
    DeltaGrpc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApiVersion {
    V3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrpcService {
    pub envoy_grpc: EnvoyGrpc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyGrpc {
    pub cluster_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticResources {
    pub clusters: Vec<Cluster>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    #[serde(serialize_with = "serialize_duration")]
    pub connect_timeout: Duration,
    pub lb_policy: LbPolicy,
    pub load_assignment: ClusterLoadAssignment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http2_protocol_options: Option<Http2ProtocolOptions>,
}

impl Cluster {
    /// A static, round-robin cluster with a single endpoint.
    fn single_endpoint(name: &str, address: SocketAddress) -> Self {
        Self {
            name: name.to_string(),
            discovery_type: DiscoveryType::Static,
            connect_timeout: CONNECT_TIMEOUT,
            lb_policy: LbPolicy::RoundRobin,
            load_assignment: ClusterLoadAssignment {
                cluster_name: name.to_string(),
                endpoints: vec![LocalityLbEndpoints {
                    lb_endpoints: vec![LbEndpoint {
                        endpoint: Endpoint {
                            address: address.into(),
                        },
                    }],
                }],
            },
            http2_protocol_options: None,
        }
    }

    /// First endpoint's socket address.
    pub fn endpoint_address(&self) -> Option<&SocketAddress> {
        self.load_assignment
            .endpoints
            .first()
            .and_then(|locality| locality.lb_endpoints.first())
            .map(|lb| &lb.endpoint.address.socket_address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LbPolicy {
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Http2ProtocolOptions {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityLbEndpoints {
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LbEndpoint {
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsConfig {
    pub stats_tags: Vec<TagSpecifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSpecifier {
    pub tag_name: String,
    pub fixed_value: String,
}

/// proto3 JSON renders durations as decimal seconds with an `s` suffix.
fn serialize_duration<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let rendered = if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}s", duration.as_secs_f64())
    };
    serializer.serialize_str(&rendered)
}

/// Build the bootstrap document for the given config and options.
pub fn build_bootstrap(
    config: &ApplicationConfig,
    options: &ServerOptions,
    control_plane_port: &str,
) -> Result<Bootstrap, BootstrapError> {
    let node = Node {
        id: NODE_NAME.to_string(),
        cluster: NODE_NAME.to_string(),
    };

    let admin = Admin {
        access_log_path: config.envoy_admin.access_log_path.clone(),
        profile_path: config.envoy_admin.profile_path.clone(),
        address: parse_address(&config.envoy_admin.address)?.into(),
    };

    let dynamic_resources = DynamicResources {
        lds_config: ConfigSource::ads(),
        cds_config: ConfigSource::ads(),
        ads_config: ApiConfigSource {
            api_type: ApiType::DeltaGrpc,
            transport_api_version: ApiVersion::V3,
            grpc_services: vec![GrpcService {
                envoy_grpc: EnvoyGrpc {
                    cluster_name: CONTROL_PLANE_CLUSTER.to_string(),
                },
            }],
        },
    };

    let port: u16 = control_plane_port
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| BootstrapError::InvalidControlPlanePort {
            port: control_plane_port.to_string(),
            reason: e.to_string(),
        })?;

    let mut control_plane = Cluster::single_endpoint(
        CONTROL_PLANE_CLUSTER,
        SocketAddress {
            address: "127.0.0.1".to_string(),
            port_value: u32::from(port),
        },
    );
    control_plane.http2_protocol_options = Some(Http2ProtocolOptions {});

    let mut clusters = vec![control_plane];
    if options.tracing.provider.requires_local_collector() {
        let address = datadog_address(options.tracing.datadog_address.as_deref());
        clusters.push(Cluster::single_endpoint(DATADOG_CLUSTER, address));
    }

    Ok(Bootstrap {
        node,
        admin,
        dynamic_resources,
        static_resources: StaticResources { clusters },
        stats_config: build_stats_config(options),
    })
}

fn build_stats_config(options: &ServerOptions) -> StatsConfig {
    StatsConfig {
        stats_tags: vec![TagSpecifier {
            tag_name: "service".to_string(),
            fixed_value: service_name(&options.services),
        }],
    }
}

/// Collector address, applying a `host:port` override where it parses.
fn datadog_address(raw: Option<&str>) -> SocketAddress {
    let mut address = SocketAddress {
        address: DEFAULT_DATADOG_HOST.to_string(),
        port_value: DEFAULT_DATADOG_PORT,
    };

    if let Some((host, port)) = raw.and_then(|raw| split_host_port(raw).ok()) {
        if !host.is_empty() {
            address.address = host.to_string();
        }
        if let Ok(port) = port.parse::<u16>() {
            address.port_value = u32::from(port);
        }
    }
    address
}

/// Parse a `host:port` string into an envoy socket address.
///
/// An empty host binds all interfaces.
pub fn parse_address(raw: &str) -> Result<SocketAddress, BootstrapError> {
    let invalid = |reason: &str| BootstrapError::InvalidAddress {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = split_host_port(raw).map_err(invalid)?;
    let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

    Ok(SocketAddress {
        address: if host.is_empty() { "0.0.0.0".to_string() } else { host.to_string() },
        port_value: u32::from(port),
    })
}

/// Split `host:port` or `[v6]:port`.
fn split_host_port(raw: &str) -> Result<(&str, &str), &'static str> {
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or("missing ']' in address")?;
        let port = after.strip_prefix(':').ok_or("missing port in address")?;
        return Ok((host, port));
    }

    let (host, port) = raw.rsplit_once(':').ok_or("missing port in address")?;
    if host.contains(':') {
        return Err("too many colons in address");
    }
    Ok((host, port))
}
