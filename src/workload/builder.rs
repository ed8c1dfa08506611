//! Desired state builder
//!
//! Builds the ConfigMap, Deployment and Service for one CorazaWaf from its
//! compiled Envoy documents. Every object carries the identity labels, a
//! controller owner reference when the owner's UID is known, and a hash of
//! its own body used to skip no-op applies.

use std::collections::BTreeMap;

use kube::Resource;
use serde::Serialize;

use super::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, Deployment, DeploymentSpec,
    DeploymentStrategy, EmptyDirVolumeSource, HttpGetAction, LabelSelector, ObjectMeta,
    OwnerReference, PodMeta, PodSpec, PodTemplateSpec, ProbeSpec, RollingUpdateConfig, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount,
};
use crate::crd::CorazaWaf;
use crate::envoy::{EnvoyDocuments, ENVOY_CONFIG_PATH};
use crate::{
    Error, ADMIN_PORT, DESIRED_HASH_ANNOTATION, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_NAME,
    LABEL_PART_OF, NAME_PREFIX, OPERATOR_NAME, TRAFFIC_PORT,
};

const CONFIG_MAP_PREFIX: &str = "corazawaf-envoyconfig";
const DEPLOYMENT_PREFIX: &str = "corazawaf-deployment";
const SERVICE_PREFIX: &str = "corazawaf-service";

const CONTAINER_NAME: &str = "corazawaf-envoy";
const VOLUME_CONFIG: &str = "envoy-config-volume";
const VOLUME_TMP: &str = "coraza-tmp-volume";
const TMP_PATH: &str = "/tmp";

/// Name of the ConfigMap for a CorazaWaf
pub fn config_map_name(waf_name: &str) -> String {
    format!("{CONFIG_MAP_PREFIX}-{waf_name}")
}

/// Name of the Deployment for a CorazaWaf
pub fn deployment_name(waf_name: &str) -> String {
    format!("{DEPLOYMENT_PREFIX}-{waf_name}")
}

/// Name of the Service for a CorazaWaf
pub fn service_name(waf_name: &str) -> String {
    format!("{SERVICE_PREFIX}-{waf_name}")
}

/// Compute a deterministic hash of a string
///
/// Truncated SHA-256, stable across toolchains, so it is safe to persist in
/// annotations.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

/// Identity and inputs for building the workloads of one CorazaWaf
#[derive(Clone, Copy, Debug)]
pub struct WorkloadInput<'a> {
    /// CorazaWaf name
    pub name: &'a str,
    /// CorazaWaf namespace
    pub namespace: &'a str,
    /// CorazaWaf UID, used for the owner reference
    pub uid: Option<&'a str>,
    /// Full proxy image reference (`name:version`)
    pub image: &'a str,
    /// Compiled Envoy documents
    pub documents: &'a EnvoyDocuments,
}

/// Desired objects for one CorazaWaf
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredState {
    /// Envoy configuration
    pub config_map: ConfigMap,
    /// Envoy proxy
    pub deployment: Deployment,
    /// Proxy traffic endpoint
    pub service: Service,
}

impl DesiredState {
    /// Objects in convergence order: ConfigMap, Deployment, Service
    ///
    /// Each object's manifest carries the hash annotation of its own body.
    pub fn objects(&self) -> Result<Vec<DesiredObject>, Error> {
        Ok(vec![
            DesiredObject::new("ConfigMap", &self.config_map.metadata, &self.config_map)?,
            DesiredObject::new("Deployment", &self.deployment.metadata, &self.deployment)?,
            DesiredObject::new("Service", &self.service.metadata, &self.service)?,
        ])
    }
}

/// A fully rendered object ready for server-side apply
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredObject {
    /// Kind (ConfigMap, Deployment or Service)
    pub kind: String,
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
    /// Hash of the manifest body without the hash annotation
    pub hash: String,
    /// Manifest including the hash annotation
    pub manifest: serde_json::Value,
}

impl DesiredObject {
    fn new<T: Serialize>(kind: &str, meta: &ObjectMeta, resource: &T) -> Result<Self, Error> {
        let mut manifest = serde_json::to_value(resource)?;
        let hash = deterministic_hash(&serde_json::to_string(&manifest)?);

        let annotations = manifest
            .get_mut("metadata")
            .and_then(|m| m.as_object_mut())
            .map(|m| {
                m.entry("annotations")
                    .or_insert_with(|| serde_json::json!({}))
            })
            .and_then(|a| a.as_object_mut())
            .ok_or_else(|| Error::internal(format!("{kind} manifest has no metadata")))?;
        annotations.insert(
            DESIRED_HASH_ANNOTATION.to_string(),
            serde_json::Value::String(hash.clone()),
        );

        Ok(Self {
            kind: kind.to_string(),
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            hash,
            manifest,
        })
    }
}

/// Compiler for the Kubernetes workloads of a CorazaWaf
///
/// Generates:
/// - ConfigMap: the three Envoy documents
/// - Deployment: one Envoy replica mounting the ConfigMap
/// - Service: the proxy's traffic port, selecting the Deployment's pods
pub struct WafWorkloadCompiler;

impl WafWorkloadCompiler {
    /// Build the desired state for a CorazaWaf
    pub fn compile(input: &WorkloadInput<'_>) -> DesiredState {
        let owner = Self::owner_reference(input);

        DesiredState {
            config_map: Self::compile_config_map(input, owner.clone()),
            deployment: Self::compile_deployment(input, owner.clone()),
            service: Self::compile_service(input, owner),
        }
    }

    fn owner_reference(input: &WorkloadInput<'_>) -> Option<OwnerReference> {
        input.uid.map(|uid| OwnerReference {
            api_version: CorazaWaf::api_version(&()).to_string(),
            kind: CorazaWaf::kind(&()).to_string(),
            name: input.name.to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }

    /// Labels every owned object carries
    fn identity_labels(app_name: &str, waf_name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_NAME.to_string(), app_name.to_string()),
            (LABEL_INSTANCE.to_string(), waf_name.to_string()),
            (LABEL_PART_OF.to_string(), format!("{NAME_PREFIX}{waf_name}")),
            (LABEL_MANAGED_BY.to_string(), OPERATOR_NAME.to_string()),
        ])
    }

    /// Labels selecting the proxy pods of one CorazaWaf
    pub fn selector_labels(waf_name: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_NAME.to_string(), DEPLOYMENT_PREFIX.to_string()),
            (LABEL_INSTANCE.to_string(), waf_name.to_string()),
        ])
    }

    fn metadata(
        name: String,
        app_name: &str,
        input: &WorkloadInput<'_>,
        owner: Option<OwnerReference>,
    ) -> ObjectMeta {
        let mut meta = ObjectMeta::new(name, input.namespace).with_owner(owner);
        meta.labels = Self::identity_labels(app_name, input.name);
        meta
    }

    fn compile_config_map(input: &WorkloadInput<'_>, owner: Option<OwnerReference>) -> ConfigMap {
        let name = config_map_name(input.name);
        ConfigMap {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
            metadata: Self::metadata(name.clone(), &name, input, owner),
            data: input.documents.entries(),
        }
    }

    fn compile_deployment(input: &WorkloadInput<'_>, owner: Option<OwnerReference>) -> Deployment {
        let labels = Self::identity_labels(DEPLOYMENT_PREFIX, input.name);

        Deployment {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            metadata: Self::metadata(deployment_name(input.name), DEPLOYMENT_PREFIX, input, owner),
            spec: DeploymentSpec {
                replicas: 1,
                progress_deadline_seconds: 600,
                revision_history_limit: 3,
                selector: LabelSelector {
                    match_labels: Self::selector_labels(input.name),
                },
                strategy: DeploymentStrategy {
                    type_: "RollingUpdate".to_string(),
                    rolling_update: Some(RollingUpdateConfig {
                        max_unavailable: "25%".to_string(),
                        max_surge: "25%".to_string(),
                    }),
                },
                template: PodTemplateSpec {
                    metadata: PodMeta { labels },
                    spec: PodSpec {
                        containers: vec![Self::compile_container(input.image)],
                        volumes: vec![
                            Volume {
                                name: VOLUME_CONFIG.to_string(),
                                config_map: Some(ConfigMapVolumeSource {
                                    name: config_map_name(input.name),
                                }),
                                empty_dir: None,
                            },
                            Volume {
                                name: VOLUME_TMP.to_string(),
                                config_map: None,
                                empty_dir: Some(EmptyDirVolumeSource {}),
                            },
                        ],
                    },
                },
            },
        }
    }

    fn compile_container(image: &str) -> Container {
        Container {
            name: CONTAINER_NAME.to_string(),
            image: image.to_string(),
            image_pull_policy: Some("Always".to_string()),
            ports: vec![
                ContainerPort {
                    name: Some("traffic-port".to_string()),
                    container_port: TRAFFIC_PORT,
                    protocol: Some("TCP".to_string()),
                },
                ContainerPort {
                    name: Some("admin-port".to_string()),
                    container_port: ADMIN_PORT,
                    protocol: Some("TCP".to_string()),
                },
            ],
            liveness_probe: Some(Self::admin_probe("/listeners", Some(5))),
            readiness_probe: Some(Self::admin_probe("/ready", None)),
            volume_mounts: vec![
                VolumeMount {
                    name: VOLUME_CONFIG.to_string(),
                    mount_path: ENVOY_CONFIG_PATH.to_string(),
                    read_only: Some(true),
                },
                VolumeMount {
                    name: VOLUME_TMP.to_string(),
                    mount_path: TMP_PATH.to_string(),
                    read_only: None,
                },
            ],
        }
    }

    fn admin_probe(path: &str, initial_delay_seconds: Option<u32>) -> ProbeSpec {
        ProbeSpec {
            http_get: HttpGetAction {
                path: path.to_string(),
                port: ADMIN_PORT,
                scheme: Some("HTTP".to_string()),
            },
            initial_delay_seconds,
            period_seconds: 30,
            timeout_seconds: 10,
            success_threshold: 1,
            failure_threshold: 3,
        }
    }

    fn compile_service(input: &WorkloadInput<'_>, owner: Option<OwnerReference>) -> Service {
        Service {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata: Self::metadata(service_name(input.name), SERVICE_PREFIX, input, owner),
            spec: ServiceSpec {
                selector: Self::selector_labels(input.name),
                ports: vec![ServicePort {
                    name: Some("http".to_string()),
                    port: TRAFFIC_PORT,
                    target_port: Some(TRAFFIC_PORT),
                    protocol: Some("TCP".to_string()),
                }],
            },
        }
    }
}
