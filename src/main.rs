//! offline-cache: offline cache & prefetch proxy.
//!
//! Sits between the tracker page and its origin, keeping versioned
//! partitions of captured responses on disk:
//!   app-shell (warm-up) · images (generic) · sprites (variants)
//!
//! Install warms the app shell, activation sweeps older generations, and
//! from then on every request is answered by its class's caching strategy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use offline_cache::cache::disk_store::DiskStore;
use offline_cache::cache::store::SharedStore;
use offline_cache::config::{Cli, Config};
use offline_cache::layer::control::control_channel;
use offline_cache::layer::Layer;
use offline_cache::metrics::Metrics;
use offline_cache::net::{HttpFetcher, SharedFetcher};
use offline_cache::server::proxy::{build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "offline_cache=debug,tower_http=debug"
    } else {
        "offline_cache=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("offline-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let names = config.partition_names();
    info!(
        upstream = %config.server.upstream,
        version = %config.partitions.version,
        partitions = ?names.all(),
        "Configuration loaded"
    );

    // Storage, transport and metrics.
    let disk = DiskStore::new(&config.storage).await?;
    info!(root = %disk.root().display(), "Disk store ready");
    let store: SharedStore = Arc::new(disk);
    let fetcher: SharedFetcher = Arc::new(HttpFetcher::new(Duration::from_secs(
        config.server.request_timeout_secs,
    ))?);
    let metrics = Arc::new(Metrics::new()?);

    let layer = Arc::new(Layer::new(&config, store, fetcher, metrics)?);

    // Control channel.
    let (control, control_rx) = control_channel(64);
    tokio::spawn(layer.control.clone().run(control_rx));

    // Install, then activate once the previous version is released.
    if cli.skip_waiting {
        layer.lifecycle.skip_waiting();
    }
    let report = layer.lifecycle.install().await?;
    info!(cached = report.cached, failed = report.failed, "Warm-up finished");

    let lifecycle = layer.lifecycle.clone();
    let grace = Duration::from_secs(config.lifecycle.activation_grace_secs);
    tokio::spawn(async move {
        let event = lifecycle.wait_for_activation(tokio::time::sleep(grace)).await;
        if let Err(e) = lifecycle.activate(event).await {
            error!(error = %e, "Activation failed");
        }
    });

    // Build application state.
    let state = Arc::new(AppState {
        layer: layer.clone(),
        control,
        upstream: config.upstream()?,
        max_body_bytes: config.server.max_body_bytes,
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    info!(addr = listen_addr, "Starting server");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // Let in-flight prefetches finish writing.
    layer.tasks.close();
    layer.tasks.wait().await;
    info!("Shut down");

    Ok(())
}
