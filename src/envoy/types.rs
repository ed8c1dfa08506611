//! Envoy configuration types
//!
//! Only the subset of the Envoy v3 API the proxy needs. Field names follow
//! Envoy's snake_case proto JSON mapping.

use serde::{Deserialize, Serialize};

// =============================================================================
// Bootstrap
// =============================================================================

/// Static bootstrap pointing Envoy at file-based LDS and CDS
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bootstrap {
    /// Node identity
    pub node: Node,
    /// Admin interface
    pub admin: Admin,
    /// Dynamic resource sources
    pub dynamic_resources: DynamicResources,
}

/// Envoy node identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Node id
    pub id: String,
    /// Node cluster
    pub cluster: String,
}

/// Admin listener
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Admin {
    /// Bind address
    pub address: Address,
}

/// LDS and CDS sources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DynamicResources {
    /// Listener discovery source
    pub lds_config: ConfigSource,
    /// Cluster discovery source
    pub cds_config: ConfigSource,
}

/// A file-backed xDS config source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigSource {
    /// File watched by Envoy
    pub path_config_source: PathConfigSource,
}

/// Path to an xDS file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathConfigSource {
    /// Absolute file path
    pub path: String,
}

impl ConfigSource {
    /// Config source watching the given file
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path_config_source: PathConfigSource { path: path.into() },
        }
    }
}

// =============================================================================
// Addresses
// =============================================================================

/// Envoy address wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    /// TCP socket address
    pub socket_address: SocketAddress,
}

/// TCP socket address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocketAddress {
    /// IP or hostname
    pub address: String,
    /// Port
    pub port_value: u16,
}

impl Address {
    /// Socket address for host and port
    pub fn socket(address: impl Into<String>, port_value: u16) -> Self {
        Self {
            socket_address: SocketAddress {
                address: address.into(),
                port_value,
            },
        }
    }
}

// =============================================================================
// Discovery Documents
// =============================================================================

/// File-based discovery response holding a list of resources
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryResponse<T> {
    /// Resources of a single type
    pub resources: Vec<T>,
}

/// Listener resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listener {
    /// Resource type URL
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Listener name
    pub name: String,
    /// Bind address
    pub address: Address,
    /// Filter chains
    pub filter_chains: Vec<FilterChain>,
}

/// Network filter chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterChain {
    /// Network filters
    pub filters: Vec<NetworkFilter>,
}

/// HTTP connection manager network filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkFilter {
    /// Filter name
    pub name: String,
    /// Filter configuration
    pub typed_config: HttpConnectionManager,
}

/// HTTP connection manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConnectionManager {
    /// Type URL
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Stats prefix
    pub stat_prefix: String,
    /// Inline route table
    pub route_config: RouteConfiguration,
    /// HTTP filter chain, router last
    pub http_filters: Vec<HttpFilter>,
}

/// Route table
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfiguration {
    /// Route table name
    pub name: String,
    /// Virtual hosts
    pub virtual_hosts: Vec<VirtualHost>,
}

/// Virtual host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualHost {
    /// Name
    pub name: String,
    /// Matched host headers
    pub domains: Vec<String>,
    /// Routes
    pub routes: Vec<Route>,
}

/// A prefix route to a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    /// Match
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    /// Action
    pub route: RouteAction,
}

/// Prefix match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteMatch {
    /// Path prefix
    pub prefix: String,
}

/// Route to cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteAction {
    /// Target cluster
    pub cluster: String,
}

/// HTTP filter entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpFilter {
    /// Filter name
    pub name: String,
    /// Filter configuration
    pub typed_config: HttpFilterConfig,
}

/// Configuration of the HTTP filters the proxy uses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum HttpFilterConfig {
    /// Go plugin filter running Coraza
    Golang(GolangFilter),
    /// Terminal router filter
    Router(TypedUrl),
}

/// Envoy Go filter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GolangFilter {
    /// Type URL
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Library id
    pub library_id: String,
    /// Path to the shared object
    pub library_path: String,
    /// Registered plugin name
    pub plugin_name: String,
    /// Plugin configuration wrapper
    pub plugin_config: TypedStruct,
}

/// xDS TypedStruct wrapping the Coraza plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypedStruct {
    /// Type URL
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Plugin configuration
    pub value: CorazaPluginConfig,
}

/// Coraza Go filter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorazaPluginConfig {
    /// Named directive sets
    pub directives: std::collections::BTreeMap<String, DirectiveSet>,
    /// Directive set used for every request
    pub default_directive: String,
}

/// A list of SecLang directives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectiveSet {
    /// One directive per entry
    pub simple_directives: Vec<String>,
}

/// A typed config that only carries its type URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypedUrl {
    /// Type URL
    #[serde(rename = "@type")]
    pub type_url: String,
}

/// Upstream cluster resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    /// Resource type URL
    #[serde(rename = "@type")]
    pub type_url: String,
    /// Cluster name
    pub name: String,
    /// Connect timeout (protobuf duration, e.g. "5s")
    pub connect_timeout: String,
    /// Discovery type
    #[serde(rename = "type")]
    pub discovery_type: String,
    /// Load balancing policy
    pub lb_policy: String,
    /// Endpoints
    pub load_assignment: ClusterLoadAssignment,
}

/// Cluster endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterLoadAssignment {
    /// Cluster name
    pub cluster_name: String,
    /// Locality endpoint groups
    pub endpoints: Vec<LocalityLbEndpoints>,
}

/// Endpoint group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalityLbEndpoints {
    /// Endpoints
    pub lb_endpoints: Vec<LbEndpoint>,
}

/// Single endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LbEndpoint {
    /// Endpoint address
    pub endpoint: Endpoint,
}

/// Endpoint address wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    /// Address
    pub address: Address,
}
