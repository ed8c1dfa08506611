//! Integration tests for the CorazaWaf lifecycle
//!
//! These tests create CorazaWaf resources in a real cluster and run the
//! reconciler against the API server, checking the objects it converges.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;

use corazawaf::config::OperatorConfig;
use corazawaf::controller::{reconcile, Context};
use corazawaf::crd::{CorazaWaf, CorazaWafSpec, Mode};

use super::helpers::ensure_test_cluster;

const NAMESPACE: &str = "default";

// =============================================================================
// Test Fixtures
// =============================================================================

fn sample_waf(name: &str) -> CorazaWaf {
    let mut waf = CorazaWaf::new(name, CorazaWafSpec::for_backend("httpbin", 8000));
    waf.metadata.namespace = Some(NAMESPACE.to_string());
    waf
}

/// Delete a CorazaWaf; owned objects follow through garbage collection
async fn cleanup_waf(client: &Client, name: &str) {
    let api: Api<CorazaWaf> = Api::namespaced(client.clone(), NAMESPACE);
    let _ = api.delete(name, &DeleteParams::default()).await;
}

// =============================================================================
// Lifecycle Stories
// =============================================================================

/// Story: an application team protects a backend with a CorazaWaf
///
/// Expected behavior:
/// - The ConfigMap, Deployment and Service are created and owned by the CorazaWaf
/// - The status lists all three objects and carries no error
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_protects_backend_with_waf() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<CorazaWaf> = Api::namespaced(client.clone(), NAMESPACE);
    let name = "test-waf-create";

    cleanup_waf(&client, name).await;

    // Act: create the resource and reconcile it once
    let created = api
        .create(&PostParams::default(), &sample_waf(name))
        .await
        .expect("failed to create CorazaWaf");
    let ctx = Arc::new(Context::new(client.clone(), OperatorConfig::default()));
    reconcile(Arc::new(created), ctx)
        .await
        .expect("reconcile should succeed");

    // Assert: owned objects exist
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), NAMESPACE);
    let config_map = config_maps
        .get("corazawaf-envoyconfig-test-waf-create")
        .await
        .expect("ConfigMap should exist");
    let data = config_map.data.unwrap_or_default();
    assert!(data.contains_key("envoy.yaml"));
    assert!(data.contains_key("lds.yaml"));
    assert!(data.contains_key("cds.yaml"));

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), NAMESPACE);
    let deployment = deployments
        .get("corazawaf-deployment-test-waf-create")
        .await
        .expect("Deployment should exist");
    let owners = deployment.metadata.owner_references.unwrap_or_default();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "CorazaWaf");

    let services: Api<Service> = Api::namespaced(client.clone(), NAMESPACE);
    services
        .get("corazawaf-service-test-waf-create")
        .await
        .expect("Service should exist");

    // Assert: status reports the objects
    let fetched = api.get(name).await.expect("failed to get CorazaWaf");
    let status = fetched.status.expect("status should be set");
    assert_eq!(
        status.service_name.as_deref(),
        Some("corazawaf-service-test-waf-create")
    );
    assert!(!status.has_error());

    cleanup_waf(&client, name).await;
}

/// Story: switching to detection mode updates the running configuration
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_switches_waf_to_detection_mode() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<CorazaWaf> = Api::namespaced(client.clone(), NAMESPACE);
    let name = "test-waf-detect";
    let ctx = Arc::new(Context::new(client.clone(), OperatorConfig::default()));

    cleanup_waf(&client, name).await;

    let created = api
        .create(&PostParams::default(), &sample_waf(name))
        .await
        .expect("failed to create CorazaWaf");
    reconcile(Arc::new(created), ctx.clone())
        .await
        .expect("initial reconcile should succeed");

    // Act: switch the policy to detection only
    let mut current = api.get(name).await.expect("failed to get CorazaWaf");
    current.spec.crs.mode = Mode::Detect;
    let updated = api
        .replace(name, &PostParams::default(), &current)
        .await
        .expect("failed to update CorazaWaf");
    reconcile(Arc::new(updated), ctx)
        .await
        .expect("reconcile after update should succeed");

    // Assert: the listener now runs the engine in detection mode
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), NAMESPACE);
    let config_map = config_maps
        .get("corazawaf-envoyconfig-test-waf-detect")
        .await
        .expect("ConfigMap should exist");
    let lds = config_map
        .data
        .unwrap_or_default()
        .remove("lds.yaml")
        .expect("lds.yaml should exist");
    assert!(lds.contains("SecRuleEngine DetectionOnly"));

    cleanup_waf(&client, name).await;
}

/// Story: an out-of-range backend port never reaches the reconciler
///
/// Port bounds are enforced by the CRD schema, so the API server refuses
/// the resource before the reconciler ever sees it.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_out_of_range_port_is_rejected_by_schema() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<CorazaWaf> = Api::namespaced(client.clone(), NAMESPACE);
    let name = "test-waf-invalid";

    cleanup_waf(&client, name).await;

    let mut waf = sample_waf(name);
    waf.spec.backend.port = 70000;
    let result = api.create(&PostParams::default(), &waf).await;
    assert!(result.is_err(), "schema should reject port 70000");

    cleanup_waf(&client, name).await;
}
