//! Kubernetes controller for CorazaWaf resources
//!
//! The reconciler only reaches the API server through [`KubeClient`], with
//! [`KubeClientImpl`] for production and [`InMemoryKubeClient`] for running
//! the loop without a cluster.

mod memory;
mod waf;

pub use memory::InMemoryKubeClient;
pub use waf::{
    error_policy, reconcile, Context, KubeClient, KubeClientImpl, ERROR_REQUEUE_INTERVAL,
    RESYNC_INTERVAL,
};

#[cfg(test)]
pub use waf::MockKubeClient;
