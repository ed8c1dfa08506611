//! Coraza WAF operator - CRD-driven Kubernetes operator for Envoy-based WAFs
//!
//! Users declare a `CorazaWaf` resource describing a backend and an OWASP
//! Core Rule Set policy. The operator compiles it into an Envoy
//! configuration running the Coraza Go filter, deploys the proxy next to the
//! backend and reports the outcome on the resource's status.
//!
//! # Architecture
//!
//! Compilation flows leaf-first through pure stages:
//! - The spec is validated and defaulted
//! - The CRS policy is resolved into an ordered rule family plan
//! - The plan is compiled into Envoy bootstrap, listener and cluster documents
//! - The documents are wrapped into a ConfigMap, Deployment and Service
//!
//! Only the reconciler talks to the API server, through the
//! [`controller::KubeClient`] trait.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (CorazaWaf, CRS policy, rule sets)
//! - [`crs`] - CRS policy resolution and exception compilation
//! - [`envoy`] - Envoy configuration compiler with Coraza directives
//! - [`workload`] - Workload types (ConfigMap, Deployment, Service)
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`config`] - Process-wide operator configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod crs;
pub mod envoy;
pub mod error;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the values shared by the compiler, the workload
// builder and the controller.

/// Envoy traffic listener port
pub const TRAFFIC_PORT: u16 = 8080;

/// Envoy admin interface port (probes hit this port)
pub const ADMIN_PORT: u16 = 9901;

/// Prefix of every name the operator generates
pub const NAME_PREFIX: &str = "corazawaf-";

/// Operator name, used as managed-by label value and SSA field manager
pub const OPERATOR_NAME: &str = "corazawaf-operator";

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = OPERATOR_NAME;

/// Annotation holding the hash of an owned object's desired body
pub const DESIRED_HASH_ANNOTATION: &str = "oss.u-s-p.ch/desired-hash";

/// Recommended name label
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Recommended instance label
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Recommended part-of label
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// Recommended managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label selector matching every object the operator manages
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=corazawaf-operator";

/// Prefix of the status error message
pub const ERROR_MESSAGE_PREFIX: &str = "Error: ";
