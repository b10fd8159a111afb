/// Server setup and initialization
///
/// Wires together storage, the automation engine and HTTP routes.
/// Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_event_routes, create_rule_routes, create_workflow_routes, AppState},
    config::Config,
    engine::AutomationEngine,
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the router over an already initialized engine
pub fn build_router(engine: Arc<AutomationEngine>) -> Router {
    let state = AppState { engine };

    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_rule_routes())
        .merge(create_event_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
///
/// Opens the SQLite database, creates schemas, loads persisted definitions
/// and rules, and connects the rule engine to the event bus.
pub async fn create_app(config: Config) -> Result<(Router, Arc<AutomationEngine>)> {
    tracing::info!("🏗️ Opening database: {}", config.database.url);
    let pool = connect_database(&config.database.url).await?;

    tracing::info!("🚀 Initializing automation engine");
    let engine = AutomationEngine::with_sqlite(pool, config.engine.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize storage: {}", e))?;
    engine
        .init()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load definitions and rules: {}", e))?;
    let engine = Arc::new(engine);

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = build_router(Arc::clone(&engine));

    tracing::info!("✅ Application initialized successfully");

    Ok((app, engine))
}

/// Open a SQLite pool, creating the data directory and database file when missing
pub async fn connect_database(url: &str) -> Result<SqlitePool> {
    if let Some(dir) = database_dir(url) {
        tracing::info!("📁 Ensuring data directory exists: {}", dir.display());
        std::fs::create_dir_all(dir)
            .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;
    }

    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// Parent directory of a file-backed sqlite URL
fn database_dir(url: &str) -> Option<&Path> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next()?;
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting automation server...");

    let (app, engine) = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engine.shutdown();

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
