//! OrderDesk sync host
//!
//! Runs one startup cycle, then periodic cycles until shutdown or until a
//! cycle asks for a restart. A restart is left to the process supervisor.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orderdesk_sync::config::Settings;
use orderdesk_sync::store::ConfigStore;
use orderdesk_sync::sync::{CycleMode, SyncOrchestrator};
use orderdesk_sync::transport::{pause_pair, HttpTransport, PauseSignal, ServerApi, Transport};
use orderdesk_sync::versions::VersionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "orderdesk_sync=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let settings = Settings::from_env();

    tracing::info!("Starting OrderDesk sync v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Work directory: {}", settings.paths.work_dir.display());

    let store = ConfigStore::open(&settings.paths.local_config, &settings.paths.shadow_config)
        .context("Failed to open configuration store")?;
    let server_url = settings.server_url(&store.snapshot().0);
    tracing::info!("Central service: {}", server_url);

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(&server_url, settings.timeout())
            .context("Failed to build HTTP client")?,
    );
    let orchestrator = SyncOrchestrator::new(
        ServerApi::new(transport.clone()),
        VersionManager::new(&settings.paths.work_dir, transport),
        Arc::new(store),
    );

    let (controller, pause) = pause_pair();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(settings.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut mode = CycleMode::Startup;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        // Writes are atomic, so abandoning a cycle mid-way is safe.
        let restart = tokio::select! {
            restart = run_once(&orchestrator, mode, &pause) => restart,
            _ = &mut shutdown => break,
        };

        if restart {
            tracing::info!("Restart required, exiting");
            break;
        }
        mode = CycleMode::Periodic;
    }

    controller.cancel();
    tracing::info!("Sync host shutdown complete");
    Ok(())
}

async fn run_once(orchestrator: &SyncOrchestrator, mode: CycleMode, pause: &PauseSignal) -> bool {
    match orchestrator.gather(mode, pause).await {
        Ok(input) => orchestrator.run_cycle(input, pause).await,
        Err(e) => {
            tracing::error!(?mode, "Failed to prepare sync cycle: {}", e);
            false
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
