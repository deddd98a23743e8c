//! provisor-aws: reconciles AWS managed resources.
//!
//! Objects come from an optional JSON manifest and live in an in-memory
//! store for the lifetime of the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use provisor_aws::{AutoScalingCloud, AutoScalingGroup, ProviderContext, setup_autoscaling_group};
use provisor_runtime::{Feature, InMemoryStore, Manager, ManagerOptions, ObjectStore, Registry};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// provisor AWS provider
#[derive(Parser, Debug)]
#[command(name = "provisor-aws", version, about)]
struct Args {
    /// How often converged resources are re-checked, in seconds
    #[arg(long, default_value = "60")]
    poll_interval: u64,

    /// Number of concurrent reconcile workers
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Deadline for a single reconcile, in seconds
    #[arg(long, default_value = "60")]
    reconcile_timeout: u64,

    /// Also publish connection details to the external secret store
    #[arg(long)]
    enable_external_secret_stores: bool,

    /// Region for groups that do not set one
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// JSON file with an array of AutoScalingGroup objects to load at startup
    #[arg(long)]
    manifest: Option<PathBuf>,
}

impl Args {
    fn manager_options(&self) -> Result<ManagerOptions> {
        let mut options = ManagerOptions {
            workers: self.workers,
            poll_interval: Duration::from_secs(self.poll_interval),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout),
            ..Default::default()
        };
        if self.enable_external_secret_stores {
            options
                .features
                .enable(Feature::EnableAlphaExternalSecretStores);
        }
        options.validate().context("invalid manager options")?;
        Ok(options)
    }
}

fn load_manifest(path: &Path) -> Result<Vec<AutoScalingGroup>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse manifest {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "provisor_aws=info,provisor_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let options = args.manager_options()?;

    info!("Starting provisor-aws");
    info!(
        workers = options.workers,
        poll_interval = ?options.poll_interval,
        region = %args.region,
        "manager options"
    );

    let store = Arc::new(InMemoryStore::<AutoScalingGroup>::new());
    if let Some(path) = &args.manifest {
        let groups = load_manifest(path)?;
        let count = groups.len();
        for group in groups {
            let name = group.metadata.name.clone();
            store
                .create(group)
                .await
                .with_context(|| format!("failed to load AutoScalingGroup {}", name))?;
        }
        info!(count, manifest = %path.display(), "loaded manifest");
    }

    let ctx = ProviderContext::new(AutoScalingCloud::new(), options.clone())
        .with_default_region(args.region.clone());

    let mut registry = Registry::new();
    setup_autoscaling_group(&mut registry, store, &ctx)
        .context("failed to set up AutoScalingGroup controller")?;

    let manager = Manager::new(registry, options).context("failed to create manager")?;
    manager
        .run_until(async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received SIGINT"),
                Err(e) => tracing::error!("Failed to listen for SIGINT: {}", e),
            }
        })
        .await?;

    info!("provisor-aws stopped");
    Ok(())
}
