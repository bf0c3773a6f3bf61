//! Karpenter OCI cloud provider
//!
//! Wires the OCI client, pricing and shape providers into a cloud provider
//! and keeps the price list fresh until shutdown.
//!
//! ## Usage
//!
//! ```bash
//! # Run against the cluster in the current kubeconfig
//! karpenter-oci --compartment-id ocid1.compartment.oc1..xxx --cluster-name prod
//!
//! # Run with custom log level
//! RUST_LOG=debug karpenter-oci
//! ```

use clap::Parser;
use karpenter_oci::oci::client::OciClient;
use karpenter_oci::oci::fake::FakeOci;
use karpenter_oci::oci::{ComputeApi, NetworkApi};
use karpenter_oci::providers::PricingProvider;
use karpenter_oci::{CloudProvider, OciNodeClass, Options};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Karpenter cloud provider for OCI
#[derive(Parser, Debug)]
#[command(name = "karpenter-oci")]
#[command(version, about = "Karpenter cloud provider for Oracle Cloud Infrastructure")]
struct Args {
    #[command(flatten)]
    options: Options,

    /// Serve from an in-memory OCI instead of the real APIs
    #[arg(long, env = "DRY_RUN", default_value = "false")]
    dry_run: bool,

    /// Skip listing node classes from the Kubernetes API at startup
    #[arg(long, default_value = "false")]
    skip_warmup: bool,
}

/// Build instance types for every node class so the shape cache is hot.
async fn warm_up(provider: &CloudProvider) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");
    let node_classes: Api<OciNodeClass> = Api::all(client);
    for node_class in node_classes.list(&ListParams::default()).await? {
        match provider
            .get_instance_types(&node_class.kubelet(), &node_class)
            .await
        {
            Ok(types) => info!(
                nodeclass = %node_class.name_any(),
                instance_types = types.len(),
                "Resolved instance types"
            ),
            Err(e) => warn!(
                nodeclass = %node_class.name_any(),
                error = %e,
                "Failed to resolve instance types"
            ),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();
    let options = args.options;
    options.validate()?;

    info!("Starting Karpenter OCI cloud provider");
    info!(
        cluster = %options.cluster_name,
        compartment = %options.compartment_id,
        dry_run = args.dry_run,
        "Loaded options"
    );

    let (compute, network): (Arc<dyn ComputeApi>, Arc<dyn NetworkApi>) = if args.dry_run {
        let fake = Arc::new(FakeOci::new());
        (fake.clone(), fake)
    } else {
        let client = Arc::new(OciClient::new(&options)?);
        (client.clone(), client)
    };

    let pricing = Arc::new(PricingProvider::new(&options)?);
    let provider = CloudProvider::from_options(compute, network, pricing.clone(), &options);

    let shutdown = CancellationToken::new();
    let refresh_handle = if args.dry_run {
        None
    } else {
        Some(tokio::spawn(
            pricing
                .clone()
                .run_refresh_loop(options.price_refresh_interval(), shutdown.clone()),
        ))
    };

    if !args.skip_warmup {
        if let Err(e) = warm_up(&provider).await {
            error!("Warm-up failed: {}", e);
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    shutdown.cancel();
    if let Some(handle) = refresh_handle {
        if let Err(e) = handle.await {
            error!("Pricing refresh task failed: {}", e);
        }
    }

    info!("Karpenter OCI cloud provider stopped");
    Ok(())
}
