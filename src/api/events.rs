/// Domain event ingestion
///
/// POST /api/events/{name} evaluates every rule triggered by `name` and
/// returns one execution record per rule considered. Events emitted by those
/// rules cascade through the bus as usual.

use crate::api::AppState;
use crate::error::Result;
use crate::rules::RuleExecution;
use axum::{
    extract::{Path, State},
    response::Json,
    routing::post,
    Router,
};
use serde_json::Value;

pub fn create_event_routes() -> Router<AppState> {
    Router::new().route("/api/events/{name}", post(publish_event))
}

/// Body: the event payload (any JSON value)
async fn publish_event(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<Value>,
) -> Result<Json<Vec<RuleExecution>>> {
    tracing::debug!("📨 Received event '{}'", name);
    let records = state.engine.on_event(&name, payload).await?;
    Ok(Json(records))
}
