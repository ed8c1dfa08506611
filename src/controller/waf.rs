//! CorazaWaf controller implementation
//!
//! This module implements the reconciliation logic for CorazaWaf resources.
//! Each pass validates the spec, compiles the desired ConfigMap, Deployment
//! and Service, converges them in that order and reports the outcome on the
//! resource's status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::OperatorConfig;
use crate::crd::{CorazaWaf, CorazaWafStatus};
use crate::crs::ResolvedCrsPolicy;
use crate::envoy::{self, CompileInput};
use crate::workload::{DesiredObject, WafWorkloadCompiler, WorkloadInput};
use crate::{Error, ERROR_MESSAGE_PREFIX, FIELD_MANAGER};

/// Interval of the periodic resync after a successful reconciliation
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Delay before a failed reconciliation is retried by the controller
pub const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

/// Trait abstracting Kubernetes client operations for CorazaWaf
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a live object owned by a CorazaWaf
    ///
    /// Returns `None` if the object does not exist.
    async fn get(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, Error>;

    /// Server-side apply a desired object
    async fn apply(&self, object: &DesiredObject) -> Result<(), Error>;

    /// Merge-patch the status of a CorazaWaf
    ///
    /// # Arguments
    ///
    /// * `namespace` - Namespace of the CorazaWaf
    /// * `name` - Name of the CorazaWaf
    /// * `patch` - JSON merge patch with a top-level `status` object
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_resource(kind: &str) -> Result<ApiResource, Error> {
        match kind {
            "ConfigMap" => Ok(ApiResource::erase::<ConfigMap>(&())),
            "Deployment" => Ok(ApiResource::erase::<Deployment>(&())),
            "Service" => Ok(ApiResource::erase::<Service>(&())),
            other => Err(Error::internal(format!("unsupported kind {other}"))),
        }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        let ar = Self::api_resource(kind)?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        match api.get_opt(name).await? {
            Some(obj) => Ok(Some(serde_json::to_value(obj)?)),
            None => Ok(None),
        }
    }

    async fn apply(&self, object: &DesiredObject) -> Result<(), Error> {
        let ar = Self::api_resource(&object.kind)?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &object.namespace, &ar);

        api.patch(
            &object.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&object.manifest),
        )
        .await?;

        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let api: Api<CorazaWaf> = Api::namespaced(self.client.clone(), namespace);

        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await?;

        Ok(())
    }
}

/// Controller context containing shared state and clients
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Process-wide operator configuration
    pub config: OperatorConfig,
}

impl Context {
    /// Create a new controller context with the given Kubernetes client
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            kube: Arc::new(KubeClientImpl::new(client)),
            config,
        }
    }

    /// Create a context for testing with a custom client implementation
    pub fn for_testing(kube: Arc<dyn KubeClient>, config: OperatorConfig) -> Self {
        Self { kube, config }
    }
}

/// Reconcile a CorazaWaf resource
///
/// Validation failures are reported on the status and wait for a spec
/// change. Compile and convergence failures are reported on the status and
/// returned, so [`error_policy`] schedules the retry.
#[instrument(skip(waf, ctx), fields(corazawaf = %waf.name_any()))]
pub async fn reconcile(waf: Arc<CorazaWaf>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = waf.name_any();
    let namespace = waf
        .namespace()
        .ok_or_else(|| Error::internal("CorazaWaf has no namespace"))?;
    info!("reconciling CorazaWaf");

    if let Err(e) = waf.spec.validate() {
        warn!(error = %e, "CorazaWaf validation failed");
        report_failure(&waf, &ctx, &namespace, &e).await?;
        // Validation errors need a spec change, not a retry
        return Ok(Action::await_change());
    }

    let status = match converge(&waf, &ctx, &name, &namespace).await {
        Ok(status) => status,
        Err(e) => {
            warn!(error = %e, "CorazaWaf reconciliation failed");
            if let Err(status_err) = report_failure(&waf, &ctx, &namespace, &e).await {
                error!(error = %status_err, "failed to record reconciliation error");
            }
            return Err(e);
        }
    };

    report_success(&waf, &ctx, &namespace, &status).await?;
    info!(
        configmap = ?status.config_map_name,
        deployment = ?status.deployment_name,
        service = ?status.service_name,
        "CorazaWaf converged"
    );
    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Error policy for the controller
///
/// Logs the error and requeues after a fixed delay.
pub fn error_policy(waf: Arc<CorazaWaf>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        corazawaf = %waf.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE_INTERVAL)
}

/// Compile the desired objects and converge them in order
async fn converge(
    waf: &CorazaWaf,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<CorazaWafStatus, Error> {
    let plan = ResolvedCrsPolicy::resolve(&waf.spec.crs);
    let documents = envoy::compile(&CompileInput {
        name: waf.metadata.name.as_deref(),
        namespace: waf.metadata.namespace.as_deref(),
        spec: &waf.spec,
        plan: &plan,
        gofilter_path: &ctx.config.gofilter_path,
    })?;

    let image = ctx.config.image();
    let desired = WafWorkloadCompiler::compile(&WorkloadInput {
        name,
        namespace,
        uid: waf.metadata.uid.as_deref(),
        image: &image,
        documents: &documents,
    });

    for object in desired.objects()? {
        converge_object(ctx, &object).await?;
    }

    Ok(CorazaWafStatus::ready(
        &desired.config_map.metadata.name,
        &desired.service.metadata.name,
        &desired.deployment.metadata.name,
    ))
}

/// Apply one object unless the live copy already matches it
///
/// The live object may carry server-populated fields; every field of the
/// desired manifest, the hash annotation included, must be present with the
/// same value for the apply to be skipped. Out-of-band edits to owned fields
/// are therefore reverted. Returns true if the object was applied.
async fn converge_object(ctx: &Context, object: &DesiredObject) -> Result<bool, Error> {
    let live = ctx
        .kube
        .get(&object.kind, &object.namespace, &object.name)
        .await
        .map_err(|e| Error::collaborator(&object.kind, &object.name, e.to_string()))?;

    if live
        .as_ref()
        .is_some_and(|live| contains_desired(live, &object.manifest))
    {
        debug!(kind = %object.kind, name = %object.name, "object up to date, skipping apply");
        return Ok(false);
    }

    ctx.kube
        .apply(object)
        .await
        .map_err(|e| Error::collaborator(&object.kind, &object.name, e.to_string()))?;
    info!(kind = %object.kind, name = %object.name, hash = %object.hash, "applied object");
    Ok(true)
}

/// True when `live` holds every field of `desired` with an equal value
///
/// Objects may carry extra keys; arrays must match element-wise.
fn contains_desired(live: &serde_json::Value, desired: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (live, desired) {
        (Value::Object(live), Value::Object(desired)) => desired
            .iter()
            .all(|(key, value)| live.get(key).is_some_and(|l| contains_desired(l, value))),
        (Value::Array(live), Value::Array(desired)) => {
            live.len() == desired.len()
                && live.iter().zip(desired).all(|(l, d)| contains_desired(l, d))
        }
        _ => live == desired,
    }
}

/// Overwrite the whole status after a successful reconciliation
async fn report_success(
    waf: &CorazaWaf,
    ctx: &Context,
    namespace: &str,
    status: &CorazaWafStatus,
) -> Result<(), Error> {
    if waf.status.as_ref() == Some(status) {
        debug!("status already current");
        return Ok(());
    }

    let patch = serde_json::json!({
        "status": {
            "configMapName": status.config_map_name,
            "serviceName": status.service_name,
            "deploymentName": status.deployment_name,
            "errorMessage": null,
        }
    });
    ctx.kube
        .patch_status(namespace, &waf.name_any(), &patch)
        .await
}

/// Record a failure, leaving every other status field untouched
async fn report_failure(
    waf: &CorazaWaf,
    ctx: &Context,
    namespace: &str,
    error: &Error,
) -> Result<(), Error> {
    let message = format!("{ERROR_MESSAGE_PREFIX}{error}");
    let current = waf.status.as_ref().and_then(|s| s.error_message.as_deref());
    if current == Some(message.as_str()) {
        debug!("error already recorded");
        return Ok(());
    }

    let patch = serde_json::json!({ "status": { "errorMessage": message } });
    ctx.kube
        .patch_status(namespace, &waf.name_any(), &patch)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::CorazaWafSpec;
    use crate::DESIRED_HASH_ANNOTATION;
    use std::sync::Mutex;

    fn sample_waf(name: &str) -> CorazaWaf {
        let mut waf = CorazaWaf::new(name, CorazaWafSpec::for_backend("shop-backend", 3000));
        waf.metadata.namespace = Some("web".to_string());
        waf.metadata.uid = Some("uid-1234".to_string());
        waf
    }

    fn context(mock: MockKubeClient) -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(mock),
            OperatorConfig::default(),
        ))
    }

    /// Records every status patch the controller sends
    #[derive(Clone, Default)]
    struct PatchCapture {
        patches: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl PatchCapture {
        fn record(&self, patch: &serde_json::Value) {
            self.patches.lock().unwrap().push(patch.clone());
        }

        fn last(&self) -> serde_json::Value {
            self.patches
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("no status patch recorded")
        }

        fn count(&self) -> usize {
            self.patches.lock().unwrap().len()
        }
    }

    fn capture_status(mock: &mut MockKubeClient) -> PatchCapture {
        let capture = PatchCapture::default();
        let recorder = capture.clone();
        mock.expect_patch_status()
            .returning(move |_, _, patch| {
                recorder.record(patch);
                Ok(())
            });
        capture
    }

    // =========================================================================
    // Happy Path Stories
    // =========================================================================

    mod convergence {
        use super::*;

        /// Story: a new CorazaWaf gets its ConfigMap, Deployment and Service in order
        #[tokio::test]
        async fn story_new_waf_applies_all_objects_in_order() {
            let mut mock = MockKubeClient::new();
            mock.expect_get().times(3).returning(|_, _, _| Ok(None));

            let order = Arc::new(Mutex::new(Vec::new()));
            let seen = order.clone();
            mock.expect_apply().times(3).returning(move |object| {
                seen.lock().unwrap().push(object.kind.clone());
                Ok(())
            });
            let capture = capture_status(&mut mock);

            let action = reconcile(Arc::new(sample_waf("shop")), context(mock))
                .await
                .expect("reconcile should succeed");

            assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
            assert_eq!(
                *order.lock().unwrap(),
                vec!["ConfigMap", "Deployment", "Service"]
            );

            let patch = capture.last();
            assert_eq!(
                patch["status"]["configMapName"],
                "corazawaf-envoyconfig-shop"
            );
            assert_eq!(
                patch["status"]["deploymentName"],
                "corazawaf-deployment-shop"
            );
            assert_eq!(patch["status"]["serviceName"], "corazawaf-service-shop");
            assert!(patch["status"]["errorMessage"].is_null());
            assert!(patch["status"]
                .as_object()
                .unwrap()
                .contains_key("errorMessage"));
        }

        /// Story: objects whose live hash matches are not applied again
        #[tokio::test]
        async fn story_unchanged_objects_are_skipped() {
            let waf = sample_waf("shop");
            let config = OperatorConfig::default();

            // Render the same desired state the controller will render
            let plan = ResolvedCrsPolicy::resolve(&waf.spec.crs);
            let docs = envoy::compile(&CompileInput {
                name: Some("shop"),
                namespace: Some("web"),
                spec: &waf.spec,
                plan: &plan,
                gofilter_path: &config.gofilter_path,
            })
            .unwrap();
            let image = config.image();
            let objects = WafWorkloadCompiler::compile(&WorkloadInput {
                name: "shop",
                namespace: "web",
                uid: Some("uid-1234"),
                image: &image,
                documents: &docs,
            })
            .objects()
            .unwrap();

            let mut mock = MockKubeClient::new();
            mock.expect_get().times(3).returning(move |kind, _, _| {
                Ok(objects
                    .iter()
                    .find(|o| o.kind == kind)
                    .map(|o| o.manifest.clone()))
            });
            mock.expect_apply().never();
            let capture = capture_status(&mut mock);

            reconcile(Arc::new(waf), context(mock))
                .await
                .expect("reconcile should succeed");
            assert_eq!(capture.count(), 1);
        }

        /// Story: a drifted object is re-applied while current ones are left alone
        #[tokio::test]
        async fn story_drifted_object_is_reapplied() {
            let mut mock = MockKubeClient::new();
            mock.expect_get().times(3).returning(|_, _, _| {
                Ok(Some(serde_json::json!({
                    "metadata": { "annotations": { DESIRED_HASH_ANNOTATION: "stale" } }
                })))
            });
            mock.expect_apply().times(3).returning(|_| Ok(()));
            capture_status(&mut mock);

            reconcile(Arc::new(sample_waf("shop")), context(mock))
                .await
                .expect("reconcile should succeed");
        }

        /// Story: a hand edit that keeps the hash annotation is still reverted
        #[tokio::test]
        async fn story_hand_edited_object_is_reverted() {
            let waf = sample_waf("shop");
            let config = OperatorConfig::default();
            let plan = ResolvedCrsPolicy::resolve(&waf.spec.crs);
            let docs = envoy::compile(&CompileInput {
                name: Some("shop"),
                namespace: Some("web"),
                spec: &waf.spec,
                plan: &plan,
                gofilter_path: &config.gofilter_path,
            })
            .unwrap();
            let image = config.image();
            let mut objects = WafWorkloadCompiler::compile(&WorkloadInput {
                name: "shop",
                namespace: "web",
                uid: Some("uid-1234"),
                image: &image,
                documents: &docs,
            })
            .objects()
            .unwrap();
            // Scale the Deployment to zero behind the operator's back
            objects[1].manifest["spec"]["replicas"] = serde_json::json!(0);

            let mut mock = MockKubeClient::new();
            mock.expect_get().times(3).returning(move |kind, _, _| {
                Ok(objects
                    .iter()
                    .find(|o| o.kind == kind)
                    .map(|o| o.manifest.clone()))
            });
            mock.expect_apply()
                .withf(|o| o.kind == "Deployment")
                .times(1)
                .returning(|_| Ok(()));
            mock.expect_apply()
                .withf(|o| o.kind != "Deployment")
                .never();
            capture_status(&mut mock);

            reconcile(Arc::new(waf), context(mock))
                .await
                .expect("reconcile should succeed");
        }

        /// Story: a status that already matches is not patched again
        #[tokio::test]
        async fn story_current_status_is_not_repatched() {
            let mut waf = sample_waf("shop");
            waf.status = Some(CorazaWafStatus::ready(
                "corazawaf-envoyconfig-shop",
                "corazawaf-service-shop",
                "corazawaf-deployment-shop",
            ));

            let mut mock = MockKubeClient::new();
            mock.expect_get().returning(|_, _, _| Ok(None));
            mock.expect_apply().returning(|_| Ok(()));
            mock.expect_patch_status().never();

            reconcile(Arc::new(waf), context(mock))
                .await
                .expect("reconcile should succeed");
        }
    }

    // =========================================================================
    // Failure Stories
    // =========================================================================

    mod failures {
        use super::*;

        /// Story: an invalid spec is reported and waits for the user to fix it
        #[tokio::test]
        async fn story_invalid_spec_waits_for_change() {
            let mut waf = sample_waf("shop");
            waf.spec.backend.port = 0;

            let mut mock = MockKubeClient::new();
            mock.expect_get().never();
            mock.expect_apply().never();
            let capture = capture_status(&mut mock);

            let action = reconcile(Arc::new(waf), context(mock))
                .await
                .expect("validation failure is not a reconcile error");

            assert_eq!(action, Action::await_change());
            let patch = capture.last();
            let message = patch["status"]["errorMessage"].as_str().unwrap();
            assert!(message.starts_with("Error: "));
            assert!(message.contains("backend.port"));
            // Only the error field is touched
            assert_eq!(patch["status"].as_object().unwrap().len(), 1);
        }

        /// Story: a failed Deployment apply stops before the Service
        #[tokio::test]
        async fn story_failed_apply_stops_convergence() {
            let mut mock = MockKubeClient::new();
            mock.expect_get().returning(|_, _, _| Ok(None));
            mock.expect_apply()
                .withf(|o| o.kind == "ConfigMap")
                .times(1)
                .returning(|_| Ok(()));
            mock.expect_apply()
                .withf(|o| o.kind == "Deployment")
                .times(1)
                .returning(|_| Err(Error::internal("admission webhook denied")));
            mock.expect_apply()
                .withf(|o| o.kind == "Service")
                .never();
            let capture = capture_status(&mut mock);

            let err = reconcile(Arc::new(sample_waf("shop")), context(mock))
                .await
                .expect_err("apply failure should surface");

            match &err {
                Error::Collaborator { kind, name, .. } => {
                    assert_eq!(kind, "Deployment");
                    assert_eq!(name, "corazawaf-deployment-shop");
                }
                other => panic!("expected collaborator error, got {other:?}"),
            }
            let patch = capture.last();
            let message = patch["status"]["errorMessage"].as_str().unwrap();
            assert!(message.starts_with("Error: failed to converge Deployment"));
            assert!(message.contains("admission webhook denied"));
            assert!(patch["status"].get("serviceName").is_none());
        }

        /// Story: a failing read is reported like a failing apply
        #[tokio::test]
        async fn story_failed_get_is_a_collaborator_error() {
            let mut mock = MockKubeClient::new();
            mock.expect_get()
                .returning(|_, _, _| Err(Error::internal("connection refused")));
            mock.expect_apply().never();
            capture_status(&mut mock);

            let err = reconcile(Arc::new(sample_waf("shop")), context(mock))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Collaborator { ref kind, .. } if kind == "ConfigMap"));
        }

        /// Story: the same error is not written to the status twice
        #[tokio::test]
        async fn story_recorded_error_is_not_repatched() {
            let mut waf = sample_waf("shop");
            waf.spec.backend.hostname = String::new();
            let message = format!(
                "Error: {}",
                Error::validation("backend.hostname", "hostname cannot be empty")
            );
            waf.status = Some(CorazaWafStatus {
                error_message: Some(message),
                ..Default::default()
            });

            let mut mock = MockKubeClient::new();
            mock.expect_patch_status().never();

            let action = reconcile(Arc::new(waf), context(mock)).await.unwrap();
            assert_eq!(action, Action::await_change());
        }

        #[tokio::test]
        async fn missing_namespace_is_an_internal_error() {
            let mut waf = sample_waf("shop");
            waf.metadata.namespace = None;

            let mock = MockKubeClient::new();
            let err = reconcile(Arc::new(waf), context(mock)).await.unwrap_err();
            assert!(matches!(err, Error::Internal(_)));
        }

        #[test]
        fn error_policy_requeues() {
            let waf = Arc::new(sample_waf("shop"));
            let ctx = context(MockKubeClient::new());
            let action = error_policy(waf, &Error::internal("boom"), ctx);
            assert_eq!(action, Action::requeue(ERROR_REQUEUE_INTERVAL));
        }
    }

    #[test]
    fn server_populated_fields_do_not_count_as_drift() {
        let desired = serde_json::json!({
            "metadata": { "name": "svc", "labels": { "a": "1" } },
            "spec": { "ports": [{ "port": 8080 }] }
        });
        let live = serde_json::json!({
            "metadata": { "name": "svc", "labels": { "a": "1" }, "uid": "u", "resourceVersion": "7" },
            "spec": { "ports": [{ "port": 8080, "protocol": "TCP" }], "clusterIP": "10.0.0.1" },
            "status": {}
        });
        assert!(contains_desired(&live, &desired));
    }

    #[test]
    fn changed_or_missing_fields_are_drift() {
        let desired = serde_json::json!({
            "metadata": { "annotations": { DESIRED_HASH_ANNOTATION: "abc123" } },
            "spec": { "replicas": 1, "ports": [{ "port": 8080 }] }
        });

        let edited = serde_json::json!({
            "metadata": { "annotations": { DESIRED_HASH_ANNOTATION: "abc123" } },
            "spec": { "replicas": 0, "ports": [{ "port": 8080 }] }
        });
        assert!(!contains_desired(&edited, &desired));

        let extra_port = serde_json::json!({
            "metadata": { "annotations": { DESIRED_HASH_ANNOTATION: "abc123" } },
            "spec": { "replicas": 1, "ports": [{ "port": 8080 }, { "port": 9901 }] }
        });
        assert!(!contains_desired(&extra_port, &desired));

        let unannotated = serde_json::json!({
            "metadata": {},
            "spec": { "replicas": 1, "ports": [{ "port": 8080 }] }
        });
        assert!(!contains_desired(&unannotated, &desired));
    }
}
