/// Rule management REST API endpoints
///
/// Rules are validated against the dispatcher's registered action types on
/// creation; a rule that names an unknown action is rejected with 422.

use crate::api::AppState;
use crate::error::{AutomationError, Result};
use crate::rules::Rule;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Request body for enabling or disabling a rule
#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Create rule routes
pub fn create_rule_routes() -> Router<AppState> {
    Router::new()
        .route("/api/rules", get(list_rules).post(create_rule))
        .route("/api/rules/{name}", get(get_rule).delete(delete_rule))
        .route("/api/rules/{name}/enabled", put(set_enabled))
}

/// Create or replace a rule
///
/// POST /api/rules
/// Body: { "name": "...", "trigger": "...", "priority": 10, "condition": {...}, "actions": [...] }
async fn create_rule(
    State(state): State<AppState>,
    Json(rule): Json<Rule>,
) -> Result<(StatusCode, Json<Rule>)> {
    let rule = state.engine.create_rule(rule).await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

/// GET /api/rules
async fn list_rules(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "rules": state.engine.rules().list_rules() }))
}

/// GET /api/rules/{name}
async fn get_rule(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Rule>> {
    state
        .engine
        .rules()
        .get_rule(&name)
        .map(Json)
        .ok_or_else(|| AutomationError::NotFound(format!("rule '{}'", name)))
}

/// PUT /api/rules/{name}/enabled
/// Body: { "enabled": false }
async fn set_enabled(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> Result<Json<Rule>> {
    let rule = state.engine.rules().set_enabled(&name, request.enabled).await?;
    tracing::info!("Rule '{}' enabled = {}", name, rule.enabled);
    Ok(Json(rule))
}

/// DELETE /api/rules/{name}
async fn delete_rule(State(state): State<AppState>, Path(name): Path<String>) -> Result<Json<Value>> {
    if state.engine.rules().remove_rule(&name).await? {
        tracing::info!("Deleted rule: {}", name);
        Ok(Json(json!({ "message": "Rule deleted successfully" })))
    } else {
        Err(AutomationError::NotFound(format!("rule '{}'", name)))
    }
}
