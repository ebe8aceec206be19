//! chatwire gateway
//!
//! - WebSocket endpoint: /ws
//! - HTTP publish endpoints for relay-mode clients
//! - Liveness monitor + daily retention cleanup
//! - Graceful shutdown on Ctrl+C / SIGTERM

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chatwire_core::error::{ChatError, Result};
use chatwire_gateway::{app_state::AppState, config, ops, router};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "chatwire-gateway failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = config::config_path();
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .map_err(|e| ChatError::Config(format!("gateway.listen must be a socket address: {e}")))?;

    let state = AppState::from_config(cfg).await?;
    let liveness = state.spawn_liveness();
    let cleanup = ops::spawn_retention_cleanup(
        state.chat().store().clone(),
        state.cfg().store.retention_days,
        ops::CLEANUP_PERIOD,
        state.shutdown_rx(),
    );

    let app = router::build_router(state.clone());
    tracing::info!(%listen, config = %path, "chatwire-gateway starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| ChatError::Internal(format!("bind {listen}: {e}")))?;

    let draining = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            draining.begin_shutdown();
        })
        .await
        .map_err(|e| ChatError::Internal(format!("server: {e}")))?;

    let _ = liveness.await;
    let _ = cleanup.await;
    tracing::info!("chatwire-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("signal received, starting graceful shutdown");
}
