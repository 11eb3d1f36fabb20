//! Crash Round Server
//!
//! Runs the round engine and serves it over WebSocket until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crash_round::{
    network::{ChannelGateway, GameServer},
    EngineConfig, RoundScheduler, ServerConfig, VERSION,
};

/// Time given to sessions to deliver their shutdown message.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let engine_config = EngineConfig::from_env().context("invalid engine configuration")?;
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;

    info!("Crash Round Server v{}", VERSION);
    info!(
        "Betting {}s, tick {:?}, growth {}/s, max crash {}, alpha {}",
        engine_config.betting_seconds,
        engine_config.tick_interval,
        engine_config.growth_rate,
        engine_config.max_crash,
        engine_config.alpha
    );
    if engine_config.server_seed.is_none() {
        info!("CRASH_SERVER_SEED not set, rounds use a random server seed");
    }

    let gateway = ChannelGateway::new(server_config.broadcast_capacity);
    let (scheduler, engine) = RoundScheduler::new(engine_config, Arc::new(gateway.clone()))
        .context("invalid engine configuration")?;
    let mut scheduler_task = scheduler.spawn();

    let server = GameServer::new(server_config, engine.clone(), gateway);
    let shutdown = server.shutdown_handle();

    let mut stop_engine = false;
    tokio::select! {
        result = server.run() => {
            result.context("game server failed")?;
        }
        result = &mut scheduler_task => {
            let _ = shutdown.send(());
            match result {
                Ok(Ok(())) => warn!("Round scheduler exited"),
                Ok(Err(e)) => {
                    error!("Round engine failed: {}", e);
                    return Err(e.into());
                }
                Err(e) => return Err(e).context("round scheduler panicked"),
            }
        }
        _ = shutdown_signal() => {
            let _ = shutdown.send(());
            stop_engine = true;
        }
    }

    if stop_engine {
        engine.shutdown().await;
        if let Ok(Err(e)) = scheduler_task.await {
            error!("Round engine failed during shutdown: {}", e);
        }
    }

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while server.connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("{} sessions still open at exit", server.connection_count().await);
    }

    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
