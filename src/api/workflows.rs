/// Workflow definition and instance REST API endpoints
///
/// Definitions hot-reload on PUT: the registry swaps in the new version and
/// the next transition sees it. Instance endpoints go through the transition
/// coordinator, so HTTP callers get the same guarantees as library callers.

use crate::api::AppState;
use crate::error::{AutomationError, Result};
use crate::workflow::{
    AvailableTransition, HistoryEntry, TransitionContext, WorkflowDefinition, WorkflowInstance,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Response for definition create/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub name: String,
    pub message: String,
}

/// Request body for instance creation
#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub entity_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub actor_id: Option<String>,
}

/// Request body for firing a transition
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub event: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    /// Free-form context recorded in the history entry
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Create workflow routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows))
        .route(
            "/api/workflows/{name}",
            put(define_workflow).get(get_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{name}/instances", post(create_instance).get(list_instances))
        .route("/api/workflows/{name}/instances/{entity_id}", get(get_instance))
        .route("/api/workflows/{name}/instances/{entity_id}/history", get(get_history))
        .route(
            "/api/workflows/{name}/instances/{entity_id}/transitions",
            get(available_transitions).post(fire_transition),
        )
        .route(
            "/api/workflows/{name}/instances/{entity_id}/transitions/{event}",
            get(check_transition),
        )
}

/// List registered definitions
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let workflows: Vec<Value> = state
        .engine
        .list_workflows()
        .iter()
        .map(|def| {
            json!({
                "name": def.name,
                "entity_type": def.entity_type,
                "initial_state": def.initial_state,
                "states": def.states.len(),
                "transitions": def.transitions.len(),
            })
        })
        .collect();

    Json(json!({ "workflows": workflows }))
}

/// Register or replace a definition
///
/// PUT /api/workflows/{name}
/// Body: { "entity_type": "...", "initial_state": "...", "states": [...], "transitions": [...] }
async fn define_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut definition): Json<WorkflowDefinition>,
) -> Result<Json<WorkflowResponse>> {
    // The URL is authoritative for the name
    definition.name = name.clone();
    state.engine.define_workflow(definition).await?;

    tracing::info!("🔥 Hot-reloaded workflow definition: {}", name);

    Ok(Json(WorkflowResponse {
        message: format!("Workflow '{}' registered successfully", name),
        name,
    }))
}

/// GET /api/workflows/{name}
async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<WorkflowDefinition>> {
    let definition = state.engine.lookup_workflow(&name)?;
    Ok(Json(WorkflowDefinition::clone(&definition)))
}

/// DELETE /api/workflows/{name}
///
/// Existing instances stay in storage; they become reachable again if the
/// definition is re-registered.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    if state.engine.coordinator().registry().remove(&name).await? {
        tracing::info!("Deleted workflow definition: {}", name);
        Ok(Json(json!({ "message": "Workflow deleted successfully" })))
    } else {
        Err(AutomationError::NotFound(format!("workflow '{}'", name)))
    }
}

/// POST /api/workflows/{name}/instances
/// Body: { "entity_id": "...", "data": {...}, "actor_id": "..." }
async fn create_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<CreateInstanceRequest>,
) -> Result<(StatusCode, Json<WorkflowInstance>)> {
    let instance = state
        .engine
        .create_instance(&name, &request.entity_id, request.data, request.actor_id.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /api/workflows/{name}/instances
async fn list_instances(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    let instances = state.engine.coordinator().list_instances(&name).await?;
    Ok(Json(json!({ "instances": instances })))
}

/// GET /api/workflows/{name}/instances/{entity_id}
async fn get_instance(
    State(state): State<AppState>,
    Path((name, entity_id)): Path<(String, String)>,
) -> Result<Json<WorkflowInstance>> {
    state
        .engine
        .get_instance(&name, &entity_id)
        .await?
        .map(Json)
        .ok_or_else(|| AutomationError::NotFound(format!("instance {}/{}", name, entity_id)))
}

/// GET /api/workflows/{name}/instances/{entity_id}/history
async fn get_history(
    State(state): State<AppState>,
    Path((name, entity_id)): Path<(String, String)>,
) -> Result<Json<Vec<HistoryEntry>>> {
    state
        .engine
        .get_history(&name, &entity_id)
        .await?
        .map(Json)
        .ok_or_else(|| AutomationError::NotFound(format!("instance {}/{}", name, entity_id)))
}

/// Transitions leaving the current state
///
/// GET /api/workflows/{name}/instances/{entity_id}/transitions
async fn available_transitions(
    State(state): State<AppState>,
    Path((name, entity_id)): Path<(String, String)>,
) -> Result<Json<Vec<AvailableTransition>>> {
    let available = state.engine.get_available_transitions(&name, &entity_id).await?;
    Ok(Json(available))
}

/// Fire a transition
///
/// POST /api/workflows/{name}/instances/{entity_id}/transitions
/// Body: { "event": "...", "actor_id": "...", "data": {...} }
async fn fire_transition(
    State(state): State<AppState>,
    Path((name, entity_id)): Path<(String, String)>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<WorkflowInstance>> {
    let mut context = TransitionContext::new();
    context.actor_id = request.actor_id;
    context.data = request.data;

    let instance = state
        .engine
        .transition(&name, &entity_id, &request.event, context)
        .await?;

    Ok(Json(instance))
}

/// Whether `event` would be accepted right now (selection and guards only)
///
/// GET /api/workflows/{name}/instances/{entity_id}/transitions/{event}
async fn check_transition(
    State(state): State<AppState>,
    Path((name, entity_id, event)): Path<(String, String, String)>,
) -> Json<Value> {
    let allowed = state
        .engine
        .can_transition(&name, &entity_id, &event, &TransitionContext::new())
        .await;

    Json(json!({ "event": event, "allowed": allowed }))
}
