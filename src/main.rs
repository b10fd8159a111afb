/// Automation core server
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server with workflow, rule and event endpoints.

use automation_core::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow definitions and instances at /api/workflows/*
/// - Rule management at /api/rules/*
/// - Event ingestion at /api/events/{name}
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004 and sqlite://data/automation.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
