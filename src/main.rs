use anyhow::Result;
use pms_cache::{create_app_router, monitoring, state::AppState};
use shared::Config;
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
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

    info!("signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads .env if present; missing file is fine.
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.app.log_level)),
        )
        .init();

    monitoring::init_monitoring();

    let port = config.app.port;
    info!(
        environment = %config.app.environment,
        backend = ?config.cache.backend,
        enabled = config.cache.enabled,
        "🚀 Starting cache service"
    );

    // Host services register their warm aggregates here; with none, the
    // configured tenants' loops only prune the warm tier.
    let warm_tasks = Vec::new();
    let app_state = Arc::new(AppState::new(config, warm_tasks).await?);
    let cache = Arc::clone(&app_state.cache);
    let app = create_app_router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cache.close().await;
    info!("🛑 Cache service stopped");

    Ok(())
}
