//! Coraza WAF Operator - deploys Envoy with the Coraza WAF filter from CorazaWaf resources

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use corazawaf::config::OperatorConfig;
use corazawaf::controller::{error_policy, reconcile, Context};
use corazawaf::crd::{CorazaWaf, CorazaWafSpec};
use corazawaf::crs::ResolvedCrsPolicy;
use corazawaf::envoy::{self, CompileInput};
use corazawaf::{FIELD_MANAGER, MANAGED_BY_SELECTOR};

/// Watch timeout, kept below the API server's default request timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Coraza WAF Operator - CRD-driven Envoy/Coraza WAF deployments
#[derive(Parser, Debug)]
#[command(name = "corazawaf-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the CorazaWaf CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches CorazaWaf resources and converges their ConfigMap,
    /// Deployment and Service.
    Controller,

    /// Validate a CorazaWaf file and print the compiled Envoy documents
    Render(RenderArgs),
}

/// Render mode arguments
#[derive(Parser, Debug)]
struct RenderArgs {
    /// Path to a CorazaWaf manifest or a bare CorazaWaf spec
    #[arg(short = 'f', long = "file")]
    file: std::path::PathBuf,

    /// Name to render with when the file has no metadata
    #[arg(long, default_value = "example")]
    name: String,

    /// Namespace to render with when the file has no metadata
    #[arg(long, default_value = "default")]
    namespace: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - aws-lc-rs backs every TLS connection to the API server
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&CorazaWaf::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    cli.config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid operator configuration: {}", e))?;

    match cli.command {
        Some(Commands::Render(args)) => run_render(args, &cli.config).await,
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// Compile a CorazaWaf file offline and print the Envoy documents
async fn run_render(args: RenderArgs, config: &OperatorConfig) -> anyhow::Result<()> {
    let content = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read {:?}: {}", args.file, e))?;

    let doc: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {:?}: {}", args.file, e))?;

    let (name, namespace, spec) = if doc.get("spec").is_some() {
        let waf: CorazaWaf = serde_yaml::from_value(doc)
            .map_err(|e| anyhow::anyhow!("Failed to parse CorazaWaf: {}", e))?;
        waf.spec.validate()?;
        (
            waf.metadata.name.unwrap_or(args.name),
            waf.metadata.namespace.unwrap_or(args.namespace),
            waf.spec,
        )
    } else {
        let spec = CorazaWafSpec::from_yaml_str(&content)?;
        (args.name, args.namespace, spec)
    };

    let plan = ResolvedCrsPolicy::resolve(&spec.crs);
    let documents = envoy::compile(&CompileInput {
        name: Some(&name),
        namespace: Some(&namespace),
        spec: &spec,
        plan: &plan,
        gofilter_path: &config.gofilter_path,
    })?;

    for (file_name, document) in documents.entries() {
        println!("---\n# {file_name}\n{document}");
    }
    Ok(())
}

/// Run the CorazaWaf controller until a shutdown signal arrives
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    tracing::info!(
        image = %config.image(),
        gofilter = %config.gofilter_path,
        "Starting CorazaWaf controller"
    );

    let wafs: Api<CorazaWaf> = Api::all(client.clone());
    let owned = || {
        WatcherConfig::default()
            .labels(MANAGED_BY_SELECTOR)
            .timeout(WATCH_TIMEOUT_SECS)
    };
    let ctx = Arc::new(Context::new(client.clone(), config));

    Controller::new(wafs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(Api::<ConfigMap>::all(client.clone()), owned())
        .owns(Api::<Deployment>::all(client.clone()), owned())
        .owns(Api::<Service>::all(client), owned())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("CorazaWaf"))
        .await;

    tracing::info!("CorazaWaf controller stopped");
    Ok(())
}

/// Ensure the CorazaWaf CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply so
/// the schema always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing CorazaWaf CRD...");
    crds.patch(
        "corazawafs.oss.u-s-p.ch",
        &params,
        &Patch::Apply(&CorazaWaf::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install CorazaWaf CRD: {}", e))?;

    Ok(())
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
