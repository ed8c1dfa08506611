//! CorazaWaf Custom Resource Definition
//!
//! A CorazaWaf declares an Envoy proxy running the Coraza WAF Go filter in
//! front of a single backend. The operator compiles it into a ConfigMap,
//! a Deployment and a Service in the resource's namespace.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::crs::CorazaWafCrs;
use crate::Error;

/// Upper bound for configurable body limits, in KiB
pub const MAX_BODY_LIMIT_KB: i64 = 1_048_576;

/// Coraza refuses body limits above 1 GiB
pub const MAX_BODY_LIMIT_BYTES: i64 = 1024 * 1024 * 1024;

/// Specification for a CorazaWaf
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "oss.u-s-p.ch",
    version = "v1alpha1",
    kind = "CorazaWaf",
    plural = "corazawafs",
    shortname = "cwaf",
    status = "CorazaWafStatus",
    namespaced,
    printcolumn = r#"{"name":"Backend","type":"string","jsonPath":".spec.backend.hostname"}"#,
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.crs.mode"}"#,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".status.serviceName"}"#,
    printcolumn = r#"{"name":"Error","type":"string","jsonPath":".status.errorMessage"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CorazaWafSpec {
    /// Upstream the proxy forwards allowed traffic to
    pub backend: CorazaWafBackend,

    /// Inspect request bodies
    #[serde(default = "default_true")]
    pub request_body_access: bool,

    /// Request body limit in KiB; bytes beyond the limit are not parsed
    #[serde(default = "default_request_body_limit_kb")]
    #[schemars(range(min = 0, max = 1_048_576))]
    pub request_body_limit_kb: i64,

    /// What to do with request bodies larger than the limit
    #[serde(default)]
    pub request_body_limit_action: BodyLimitAction,

    /// Inspect response bodies
    #[serde(default)]
    pub response_body_access: bool,

    /// Response body limit in KiB; bytes beyond the limit are not parsed
    #[serde(default = "default_response_body_limit_kb")]
    #[schemars(range(min = 0, max = 1_048_576))]
    pub response_body_limit_kb: i64,

    /// What to do with response bodies larger than the limit
    #[serde(default)]
    pub response_body_limit_action: BodyLimitAction,

    /// Use the JSON body processor for `application/json` requests
    #[serde(default = "default_true")]
    pub parse_json: bool,

    /// Reject requests whose JSON body fails to parse
    #[serde(default = "default_true")]
    pub validate_json: bool,

    /// OWASP Core Rule Set policy
    #[serde(default)]
    pub crs: CorazaWafCrs,
}

fn default_true() -> bool {
    true
}

fn default_request_body_limit_kb() -> i64 {
    128
}

fn default_response_body_limit_kb() -> i64 {
    256
}

impl CorazaWafSpec {
    /// Spec with every field at its default, proxying to the given backend
    pub fn for_backend(hostname: impl Into<String>, port: i32) -> Self {
        Self {
            backend: CorazaWafBackend {
                hostname: hostname.into(),
                port,
            },
            request_body_access: true,
            request_body_limit_kb: default_request_body_limit_kb(),
            request_body_limit_action: BodyLimitAction::default(),
            response_body_access: false,
            response_body_limit_kb: default_response_body_limit_kb(),
            response_body_limit_action: BodyLimitAction::default(),
            parse_json: true,
            validate_json: true,
            crs: CorazaWafCrs::default(),
        }
    }

    /// Parse a YAML or JSON spec document, apply defaults and validate it
    pub fn from_yaml_str(doc: &str) -> Result<Self, Error> {
        let spec: Self =
            serde_yaml::from_str(doc).map_err(|e| Error::validation("spec", e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate the spec, naming the first offending field
    pub fn validate(&self) -> Result<(), Error> {
        self.backend.validate()?;
        validate_body_limit("requestBodyLimitKb", self.request_body_limit_kb)?;
        validate_body_limit("responseBodyLimitKb", self.response_body_limit_kb)?;
        self.crs.validate()
    }

    /// Request body limit in bytes, clamped to what Coraza accepts
    pub fn request_body_limit_bytes(&self) -> i64 {
        body_limit_bytes(self.request_body_limit_kb)
    }

    /// Response body limit in bytes, clamped to what Coraza accepts
    pub fn response_body_limit_bytes(&self) -> i64 {
        body_limit_bytes(self.response_body_limit_kb)
    }
}

fn body_limit_bytes(kb: i64) -> i64 {
    kb.saturating_mul(1024).min(MAX_BODY_LIMIT_BYTES)
}

fn validate_body_limit(field: &str, kb: i64) -> Result<(), Error> {
    if !(0..=MAX_BODY_LIMIT_KB).contains(&kb) {
        return Err(Error::validation(
            field,
            format!("must be between 0 and {MAX_BODY_LIMIT_KB}, got {kb}"),
        ));
    }
    Ok(())
}

/// Upstream service protected by the WAF
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorazaWafBackend {
    /// Backend hostname (e.g. "shop.default.svc.cluster.local")
    #[schemars(length(min = 1))]
    pub hostname: String,

    /// Backend port
    #[schemars(range(min = 1, max = 65535))]
    pub port: i32,
}

impl CorazaWafBackend {
    /// Validate hostname and port
    pub fn validate(&self) -> Result<(), Error> {
        if self.hostname.trim().is_empty() {
            return Err(Error::validation(
                "backend.hostname",
                "hostname cannot be empty",
            ));
        }
        if !(1..=65535).contains(&self.port) {
            return Err(Error::validation(
                "backend.port",
                format!("must be between 1 and 65535, got {}", self.port),
            ));
        }
        Ok(())
    }
}

/// Handling of bodies larger than the configured limit
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum BodyLimitAction {
    /// Inspect up to the limit and let the rest through unchecked
    ProcessPartial,
    /// Reject the transaction
    #[default]
    Reject,
}

impl std::fmt::Display for BodyLimitAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessPartial => write!(f, "ProcessPartial"),
            Self::Reject => write!(f, "Reject"),
        }
    }
}

/// Status for a CorazaWaf
///
/// Overwritten wholesale after a successful reconciliation; a failed one only
/// touches `errorMessage`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorazaWafStatus {
    /// Name of the ConfigMap holding the Envoy configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_name: Option<String>,

    /// Name of the Service fronting the proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Name of the proxy Deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    /// Last reconciliation error, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CorazaWafStatus {
    /// Status after a successful reconciliation
    pub fn ready(
        config_map_name: impl Into<String>,
        service_name: impl Into<String>,
        deployment_name: impl Into<String>,
    ) -> Self {
        Self {
            config_map_name: Some(config_map_name.into()),
            service_name: Some(service_name.into()),
            deployment_name: Some(deployment_name.into()),
            error_message: None,
        }
    }

    /// Returns true if the last reconciliation failed
    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }
}
