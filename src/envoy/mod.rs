//! Envoy configuration compiler
//!
//! Compiles a validated CorazaWaf spec and its resolved CRS plan into the
//! three documents Envoy reads from the mounted ConfigMap:
//!
//! - `envoy.yaml` - bootstrap with the admin listener and file-based xDS
//! - `lds.yaml` - traffic listener with the Coraza Go filter
//! - `cds.yaml` - the backend cluster
//!
//! Compilation is a pure function of its input; identical input renders
//! byte-identical documents.

mod directives;
pub mod types;

use std::collections::BTreeMap;

pub use directives::coraza_directives;

use crate::crd::CorazaWafSpec;
use crate::crs::ResolvedCrsPolicy;
use crate::{Error, ADMIN_PORT, TRAFFIC_PORT};
use types::{
    Address, Bootstrap, Cluster, ClusterLoadAssignment, ConfigSource, CorazaPluginConfig,
    DirectiveSet, DiscoveryResponse, DynamicResources, Endpoint, FilterChain, GolangFilter,
    HttpConnectionManager, HttpFilter, HttpFilterConfig, LbEndpoint, Listener,
    LocalityLbEndpoints, NetworkFilter, Node, Route, RouteAction, RouteConfiguration, RouteMatch,
    TypedStruct, TypedUrl, VirtualHost,
};

/// Directory the ConfigMap is mounted at inside the proxy container
pub const ENVOY_CONFIG_PATH: &str = "/etc/envoy/";
/// Bootstrap document file name
pub const FILENAME_ENVOY: &str = "envoy.yaml";
/// Listener document file name
pub const FILENAME_LDS: &str = "lds.yaml";
/// Cluster document file name
pub const FILENAME_CDS: &str = "cds.yaml";

/// Name of the upstream cluster traffic is routed to
pub const BACKEND_CLUSTER: &str = "backend";

const CORAZA_PLUGIN_NAME: &str = "coraza-waf";
const CORAZA_DIRECTIVE_SET: &str = "default";

/// Everything the compiler needs for one CorazaWaf
#[derive(Clone, Copy, Debug)]
pub struct CompileInput<'a> {
    /// Name of the CorazaWaf
    pub name: Option<&'a str>,
    /// Namespace of the CorazaWaf
    pub namespace: Option<&'a str>,
    /// Validated spec
    pub spec: &'a CorazaWafSpec,
    /// Resolved CRS plan for the spec
    pub plan: &'a ResolvedCrsPolicy,
    /// Path of the Coraza Go filter shared object inside the image
    pub gofilter_path: &'a str,
}

/// The three rendered Envoy documents
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvoyDocuments {
    /// Bootstrap document
    pub envoy_yaml: String,
    /// Listener discovery document
    pub lds_yaml: String,
    /// Cluster discovery document
    pub cds_yaml: String,
}

impl EnvoyDocuments {
    /// Documents keyed by their file name inside the config directory
    pub fn entries(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (FILENAME_ENVOY.to_string(), self.envoy_yaml.clone()),
            (FILENAME_LDS.to_string(), self.lds_yaml.clone()),
            (FILENAME_CDS.to_string(), self.cds_yaml.clone()),
        ])
    }
}

/// Compile the Envoy documents for a CorazaWaf
///
/// Fails with [`Error::Internal`] when the resource identity is missing,
/// which validation cannot catch because it only sees the spec.
pub fn compile(input: &CompileInput<'_>) -> Result<EnvoyDocuments, Error> {
    let name = required_identity("name", input.name)?;
    let namespace = required_identity("namespace", input.namespace)?;

    let backend_port = u16::try_from(input.spec.backend.port).map_err(|_| {
        Error::internal(format!(
            "backend port {} does not fit a TCP port",
            input.spec.backend.port
        ))
    })?;

    let bootstrap = bootstrap(name, namespace);
    let listeners = DiscoveryResponse {
        resources: vec![listener(input)],
    };
    let clusters = DiscoveryResponse {
        resources: vec![backend_cluster(&input.spec.backend.hostname, backend_port)],
    };

    Ok(EnvoyDocuments {
        envoy_yaml: serde_yaml::to_string(&bootstrap)?,
        lds_yaml: serde_yaml::to_string(&listeners)?,
        cds_yaml: serde_yaml::to_string(&clusters)?,
    })
}

fn required_identity<'a>(what: &str, value: Option<&'a str>) -> Result<&'a str, Error> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::internal(format!("CorazaWaf has no {what}")))
}

fn bootstrap(name: &str, namespace: &str) -> Bootstrap {
    Bootstrap {
        node: Node {
            id: name.to_string(),
            cluster: namespace.to_string(),
        },
        admin: types::Admin {
            address: Address::socket("0.0.0.0", ADMIN_PORT),
        },
        dynamic_resources: DynamicResources {
            lds_config: ConfigSource::file(format!("{ENVOY_CONFIG_PATH}{FILENAME_LDS}")),
            cds_config: ConfigSource::file(format!("{ENVOY_CONFIG_PATH}{FILENAME_CDS}")),
        },
    }
}

fn listener(input: &CompileInput<'_>) -> Listener {
    let coraza = HttpFilter {
        name: "envoy.filters.http.golang".to_string(),
        typed_config: HttpFilterConfig::Golang(GolangFilter {
            type_url: "type.googleapis.com/envoy.extensions.filters.http.golang.v3alpha.Config"
                .to_string(),
            library_id: CORAZA_PLUGIN_NAME.to_string(),
            library_path: input.gofilter_path.to_string(),
            plugin_name: CORAZA_PLUGIN_NAME.to_string(),
            plugin_config: TypedStruct {
                type_url: "type.googleapis.com/xds.type.v3.TypedStruct".to_string(),
                value: CorazaPluginConfig {
                    directives: BTreeMap::from([(
                        CORAZA_DIRECTIVE_SET.to_string(),
                        DirectiveSet {
                            simple_directives: coraza_directives(input.spec, input.plan),
                        },
                    )]),
                    default_directive: CORAZA_DIRECTIVE_SET.to_string(),
                },
            },
        }),
    };
    let router = HttpFilter {
        name: "envoy.filters.http.router".to_string(),
        typed_config: HttpFilterConfig::Router(TypedUrl {
            type_url: "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router"
                .to_string(),
        }),
    };

    Listener {
        type_url: "type.googleapis.com/envoy.config.listener.v3.Listener".to_string(),
        name: "corazawaf_listener".to_string(),
        address: Address::socket("0.0.0.0", TRAFFIC_PORT),
        filter_chains: vec![FilterChain {
            filters: vec![NetworkFilter {
                name: "envoy.filters.network.http_connection_manager".to_string(),
                typed_config: HttpConnectionManager {
                    type_url: "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager"
                        .to_string(),
                    stat_prefix: "ingress_http".to_string(),
                    route_config: RouteConfiguration {
                        name: "corazawaf_route".to_string(),
                        virtual_hosts: vec![VirtualHost {
                            name: BACKEND_CLUSTER.to_string(),
                            domains: vec!["*".to_string()],
                            routes: vec![Route {
                                route_match: RouteMatch {
                                    prefix: "/".to_string(),
                                },
                                route: RouteAction {
                                    cluster: BACKEND_CLUSTER.to_string(),
                                },
                            }],
                        }],
                    },
                    http_filters: vec![coraza, router],
                },
            }],
        }],
    }
}

fn backend_cluster(hostname: &str, port: u16) -> Cluster {
    Cluster {
        type_url: "type.googleapis.com/envoy.config.cluster.v3.Cluster".to_string(),
        name: BACKEND_CLUSTER.to_string(),
        connect_timeout: "5s".to_string(),
        discovery_type: "STRICT_DNS".to_string(),
        lb_policy: "ROUND_ROBIN".to_string(),
        load_assignment: ClusterLoadAssignment {
            cluster_name: BACKEND_CLUSTER.to_string(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![LbEndpoint {
                    endpoint: Endpoint {
                        address: Address::socket(hostname.trim(), port),
                    },
                }],
            }],
        },
    }
}
