//! arena game creator
//!
//! Keeps running games in line with the desired state published by the
//! web front end.
//!
//! ## Architecture
//!
//! - **Desired state client**: Fetches the full set of games every pass
//! - **Reconciler**: Diffs it against tracked games and fans out creates
//!   and deletes in bounded batches
//! - **Backend**: Turns create/delete into processes (mock in dev)

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use arena_game_creator::config::{BackendKind, Config};
use arena_game_creator::{
    Backend, DesiredStateClient, MockBackend, ProcessBackend, ReconciliationController,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting arena game creator");
    info!(
        games_url = %config.games_url,
        backend = %config.backend,
        poll_interval_secs = config.poll_interval.as_secs(),
        concurrency = config.concurrency,
        "Configuration loaded"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Process => {
            let (program, args) = config
                .game_command
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("empty game command"))?;
            Arc::new(ProcessBackend::new(
                program.clone(),
                args.to_vec(),
                config.game_host.clone(),
            ))
        }
        BackendKind::Mock => Arc::new(MockBackend::new()),
    };

    let source = DesiredStateClient::new(config.games_url.clone(), config.request_timeout)?;
    let controller = ReconciliationController::new(source, backend, config.reconciler_config());

    let mut reconciler_handle = tokio::spawn(async move {
        controller.run(shutdown_rx).await;
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "Reconciler task panicked");
            }
            return Ok(());
        }
    }

    // Signal shutdown and wait for the loop to leave its sleep
    let _ = shutdown_tx.send(true);
    if let Err(e) = reconciler_handle.await {
        error!(error = %e, "Reconciler task panicked");
    }

    info!("Game creator shutdown complete");
    Ok(())
}
