use anyhow::Result;
use tracing::{debug, info};

mod handlers;
mod models;
mod services;
mod utils;

use handlers::{create_app, AppState};
use models::config::AppConfig;
use utils::logging::init_logging;

const SESSION_SWEEP_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;

    if std::env::args().any(|arg| arg == "--print-config") {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let _log_guard = init_logging(&config.logging)?;

    info!("Starting InfraWatch Console v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend API at {}", config.backend.base_url);

    let bind = (config.server.host.clone(), config.server.port);
    let state = AppState::new(config)?;

    // Sessions expire on their own schedule; drop them and what was cached
    // for them.
    let sweeper = state.clone();
    tokio::spawn(async move {
        session_sweep_loop(sweeper, SESSION_SWEEP_SECS).await;
    });

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Web console listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("InfraWatch Console stopped");
    Ok(())
}

async fn session_sweep_loop(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let expired = state.sweep_expired().await;
        if expired > 0 {
            info!("Expired {} idle sessions", expired);
        }
        debug!(
            "{} active sessions, {} cached responses",
            state.auth.active_sessions(),
            state.cache.len()
        );
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
