#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::service::{AppState, Clock, router};
use server::telemetry::{increment_reaped, init_telemetry, shutdown_telemetry};
use shardline::{MonotonicClock, Orchestrator};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let clock: Clock = Arc::new(MonotonicClock::default());
    let orchestrator = Arc::new(Orchestrator::new(config.orchestrator.clone(), clock)?);
    let reaper = orchestrator.spawn_reaper(|reaped| increment_reaped(reaped.len() as u64));

    let listener = TcpListener::bind(config.server_addr).await?;
    log_startup_info(&config);

    let served = axum::serve(listener, router(AppState::new(orchestrator)))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    #[cfg(feature = "tracing")]
    if reaper.is_finished() {
        tracing::warn!("Reaper exited before shutdown was requested");
    }

    // Stop the reaper even if the server failed, so the runtime can exit.
    if let Err(_e) = reaper.shutdown().await {
        #[cfg(feature = "tracing")]
        tracing::error!("Reaper did not shut down cleanly: {_e}");
    }

    #[cfg(feature = "tracing")]
    if served.is_ok() {
        tracing::info!("Service shut down successfully");
    }

    shutdown_telemetry(providers);
    served?;
    Ok(())
}

fn log_startup_info(_config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting orchestrator on {} with full config: {:#?}",
            _config.server_addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting orchestrator on {} ({:?} treasury, coin every {}ms)",
            _config.server_addr,
            _config.orchestrator.treasury,
            _config.orchestrator.min_coin_interval.as_millis()
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");
}
