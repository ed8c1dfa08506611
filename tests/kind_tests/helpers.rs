//! Shared setup for cluster-backed tests

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use corazawaf::crd::CorazaWaf;
use corazawaf::FIELD_MANAGER;

const CRD_NAME: &str = "corazawafs.oss.u-s-p.ch";

/// Connect to the current cluster and make sure the CorazaWaf CRD is served
pub async fn ensure_test_cluster() -> Result<Client, String> {
    // Another test may already have installed it
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = Client::try_default()
        .await
        .map_err(|e| format!("failed to create client: {e}"))?;

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        CRD_NAME,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&CorazaWaf::crd()),
    )
    .await
    .map_err(|e| format!("failed to install CRD: {e}"))?;

    for _ in 0..30 {
        let crd = crds
            .get(CRD_NAME)
            .await
            .map_err(|e| format!("failed to read CRD: {e}"))?;
        let established = crd
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == "Established" && c.status == "True");
        if established {
            return Ok(client);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    Err("CorazaWaf CRD never became established".to_string())
}
