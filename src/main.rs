//! Mobile-core configuration adapter.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────┐
//!                    │              CONFIG ADAPTER                    │
//!                    │                                                │
//!  Capabilities/Get  │  ┌────────┐   ┌───────────┐   ┌────────────┐   │
//!  Set/Subscribe ────┼─▶│ server │──▶│ tree      │──▶│ sync       │   │
//!                    │  │ (axum) │   │ (RwLock'd │   │ (mailbox + │   │
//!                    │  └────────┘   │  JSON doc)│   │  worker)   │   │
//!                    │               └───────────┘   └─────┬──────┘   │
//!                    │                                     │          │
//!                    │                                     ▼          │
//!                    │                  ┌──────────────────────────┐  │   Downstream
//!                    │                  │ mapper → cache → pusher  │──┼─▶ core / UPF
//!                    │                  └──────────────────────────┘  │   services
//!                    │                                                │
//!                    │  Cross-cutting: config, observability, imsi    │
//!                    └────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use core_config_adapter::config::{load_config, AdapterConfig};
use core_config_adapter::observability::{logging, metrics};
use core_config_adapter::server::ProtocolServer;
use core_config_adapter::sync::{CoreMapper, SyncKind, Synchronizer};
use core_config_adapter::tree::TreeStore;

/// Command-line arguments. TLS and credential plumbing are owned by the
/// deployment wrapper, not by this binary.
#[derive(Parser, Debug)]
#[command(version, about = "Mobile-core configuration adapter")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to an initial config-tree JSON payload (overrides config).
    #[arg(long)]
    tree: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => AdapterConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }
    if let Some(tree) = &args.tree {
        config.initial_tree = Some(tree.display().to_string());
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        core_endpoint = %config.downstream.core_endpoint,
        upf_endpoint = %config.downstream.upf_endpoint,
        "configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }

    let initial = match &config.initial_tree {
        Some(path) => Some(std::fs::read(path)?),
        None => None,
    };
    let store = Arc::new(TreeStore::new(initial.as_deref())?);

    let mapper = Arc::new(CoreMapper::new(
        &config.downstream.core_endpoint,
        &config.downstream.upf_endpoint,
    ));
    let mut synchronizer = Synchronizer::new(mapper)?;
    synchronizer.set_retry_interval(Duration::from_secs(config.sync.retry_interval_secs));
    synchronizer.set_post_timeout(Duration::from_secs(config.sync.post_timeout_secs))?;
    synchronizer.set_post_enable(config.sync.post_enable)?;
    synchronizer.set_output_file(config.sync.output_file.clone().map(PathBuf::from))?;
    let synchronizer = Arc::new(synchronizer);
    synchronizer.start();

    // Reconcile the initial payload before accepting traffic.
    if initial.is_some() {
        let snapshot = store.snapshot().await;
        synchronizer
            .synchronize(&snapshot, SyncKind::Apply, None)
            .await?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "listening for connections");

    let server = ProtocolServer::new(config, store, synchronizer);
    server.run(listener).await?;

    tracing::info!("shutdown complete");
    Ok(())
}
