//! Zipshare Server
//!
//! Accepts folders uploaded as chunked files, packs them into one ZIP
//! archive and serves it under an unguessable link for seven days.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zipshare_server::clock::SystemClock;
use zipshare_server::config::Config;
use zipshare_server::db;
use zipshare_server::packages::SqlitePackageRegistry;
use zipshare_server::routes;
use zipshare_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "zipshare_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing::info!("Starting Zipshare Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Archive root: {}", config.storage.archive_root.display());
    tracing::info!("Staging root: {}", config.storage.staging_root.display());

    tokio::fs::create_dir_all(&config.storage.archive_root)
        .await
        .context("Failed to create archive root")?;
    tokio::fs::create_dir_all(&config.storage.staging_root)
        .await
        .context("Failed to create staging root")?;

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    let registry = Arc::new(SqlitePackageRegistry::new(db_pool));
    let app_state = AppState::new(config.clone(), registry, Arc::new(SystemClock));

    // Start reclamation sweeper
    let sweeper_task = config.packages.sweep_interval.map(|period| {
        tracing::info!("Sweeping expired packages every {:?}", period);
        app_state.sweeper().clone().start(period)
    });

    let app = routes::app(app_state);

    // Start server with graceful shutdown
    let ip = config
        .server
        .host
        .parse::<std::net::IpAddr>()
        .context("Invalid SERVER_HOST")?;
    let addr = SocketAddr::new(ip, config.server.port);
    tracing::info!("Zipshare Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(task) = sweeper_task {
        task.abort();
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install signal handler: {}", e);
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
