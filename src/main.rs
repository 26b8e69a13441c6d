//! clientmgr operator - per-client workload provisioning and binding

use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clientmgr_operator::controller::{error_policy, reconcile, Context, FIELD_MANAGER};
use clientmgr_operator::crd::Client as ClientResource;
use k8s_openapi::api::core::v1::Pod;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// clientmgr - CRD-driven operator binding clients to per-client workload pods
#[derive(Parser, Debug)]
#[command(name = "clientmgr", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Client CRDs across all namespaces and reconciles each one
    /// through its Pending -> Running -> Cleaning lifecycle.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,clientmgr_operator=debug")),
        )
        .init();

    let cli = Cli::parse();

    if cli.crd {
        // Generate CRD YAML
        let crd = serde_yaml::to_string(&ClientResource::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    match cli.command {
        Some(Commands::Controller) | None => run_controller().await,
    }
}

/// Ensure the Client CRD is installed
///
/// The operator installs its own CRD on startup using server-side apply.
/// This ensures the CRD version always matches the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing Client CRD...");
    crds.patch(
        "clients.clientmgr.io",
        &params,
        &Patch::Apply(&ClientResource::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Client CRD: {}", e))?;

    tracing::info!("Client CRD installed/updated");
    Ok(())
}

/// Run in controller mode - reconciles Client resources
async fn run_controller() -> anyhow::Result<()> {
    tracing::info!("clientmgr controller starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRD on startup
    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(Context::from_client(client.clone()));

    let clients: Api<ClientResource> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);

    tracing::info!("Starting Client controller");

    Controller::new(
        clients,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    // Owned pods re-trigger reconciliation of their Client on every change,
    // which is what drives the scheduling -> ready -> bind progression
    .owns(pods, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx)
    .for_each(|result| async move {
        match result {
            Ok((obj, action)) => {
                tracing::debug!(client = %obj.name, ?action, "Client reconciliation completed");
            }
            Err(e) => {
                tracing::error!(error = ?e, "Client reconciliation error");
            }
        }
    })
    .await;

    tracing::info!("clientmgr controller shutting down");
    Ok(())
}
