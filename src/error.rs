//! Error taxonomy for the automation core
//!
//! Every public operation returns `AutomationError` so callers can map failures
//! to their own responses (HTTP status, retry, user message) without reaching
//! into engine internals. Extension seams (guards, hooks, actions) return
//! `anyhow::Result` and are converted into the typed variants here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, AutomationError>;

/// Errors surfaced by the workflow runtime and the rule engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Invalid workflow definition or missing handler registration
    #[error("Definition error: {0}")]
    Definition(String),

    /// Workflow, instance or rule does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Instance already exists for (workflow, entity)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// No transition matches the current state and event
    #[error("Invalid transition: event '{event}' is not allowed from state '{state}'")]
    InvalidTransition { state: String, event: String },

    /// A guard refused the transition
    #[error("Guard '{guard}' rejected transition: {reason}")]
    GuardRejected { guard: String, reason: String },

    /// A before-hook failed; nothing was committed
    #[error("Hook '{hook}' failed: {reason}")]
    Hook { hook: String, reason: String },

    /// Instance changed between load and commit
    #[error("Concurrent modification of {workflow}/{entity_id}: expected version {expected}")]
    ConcurrentModification {
        workflow: String,
        entity_id: String,
        expected: i64,
    },

    /// Malformed rule or request
    #[error("Validation error: {0}")]
    Validation(String),

    /// An action failed inside a rule; never escapes that rule
    #[error("Action '{action}' failed in rule '{rule}': {reason}")]
    RuleAction {
        rule: String,
        action: String,
        reason: String,
    },

    /// Database error
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AutomationError {
    /// Short machine-readable kind, used in API responses and rule records
    pub fn kind(&self) -> &'static str {
        match self {
            AutomationError::Definition(_) => "definition_error",
            AutomationError::NotFound(_) => "not_found",
            AutomationError::AlreadyExists(_) => "already_exists",
            AutomationError::InvalidTransition { .. } => "invalid_transition",
            AutomationError::GuardRejected { .. } => "guard_rejected",
            AutomationError::Hook { .. } => "hook_error",
            AutomationError::ConcurrentModification { .. } => "concurrent_modification",
            AutomationError::Validation(_) => "validation_error",
            AutomationError::RuleAction { .. } => "rule_action_error",
            AutomationError::Storage(_) => "storage_error",
            AutomationError::Serialization(_) => "serialization_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AutomationError::Definition(_) | AutomationError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AutomationError::NotFound(_) => StatusCode::NOT_FOUND,
            AutomationError::AlreadyExists(_) | AutomationError::ConcurrentModification { .. } => {
                StatusCode::CONFLICT
            }
            AutomationError::InvalidTransition { .. } | AutomationError::GuardRejected { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AutomationError::Hook { .. } => StatusCode::FAILED_DEPENDENCY,
            AutomationError::RuleAction { .. }
            | AutomationError::Storage(_)
            | AutomationError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AutomationError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
