use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use tapline_db::Database;
use tapline_presence::sweeper;
use tapline_server::{ServerConfig, build_app, build_gateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tapline=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.has_placeholder_secret() {
        warn!("TAPLINE_JWT_SECRET is unset or a placeholder; tokens can be forged");
    }

    let db = Arc::new(Database::open(&config.db_path)?);
    let gateway = build_gateway(&config, db);

    tokio::spawn(sweeper::run_expiry_loop(
        gateway.presence().clone(),
        Duration::from_secs(config.sweep_interval_secs),
    ));

    let app = build_app(gateway);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Tapline presence server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => tokio::select! {
                _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
            },
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
