//! qrlink - QR-based device linking service

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qrlink::{
    api::{self, AppState},
    config::Config,
    db,
    services::{DynClock, SystemClock},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qrlink=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting qrlink...");

    // Load configuration
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!(
        session_ttl_seconds = config.link.session_ttl_seconds,
        sweep_grace_seconds = config.link.sweep_grace_seconds,
        "Configuration loaded"
    );

    // Initialize database
    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations completed");

    // Build application state
    let clock: DynClock = Arc::new(SystemClock);
    let state = AppState::new(pool, clock.clone(), &config);

    // Start session reaper
    let reaper = Arc::new(state.reaper(clock, &config));
    let _reaper_handle = reaper.spawn(config.link.sweep_interval());
    tracing::info!(
        interval_seconds = config.link.sweep_interval_seconds,
        "Session reaper started"
    );

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
