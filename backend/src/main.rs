// --- File: backend/src/main.rs ---

use anyhow::Context;
use notes_backend::{
    config::Settings,
    db,
    web_server::{run_server, AppState},
};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- Setup ---
    // 1. Configuration decides the log level, so it is read first.
    let settings = Settings::load().context("failed to load settings")?;

    // 2. Initialize structured logging
    let level = if settings.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(level)
        .init();

    tracing::info!("Configuration loaded successfully, full config: {:?}", settings);

    // 3. Database
    let db_pool = db::connect(&settings.database)
        .await
        .context("failed to connect to the database")?;

    tracing::info!("Running database migrations...");
    db::MIGRATOR
        .run(&db_pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("Migrations complete.");

    // --- Run Server ---
    tracing::info!("Initializing server...");
    run_server(AppState::new(db_pool, settings)).await
}
