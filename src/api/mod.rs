/// HTTP API Layer
///
/// Thin REST surface over `AutomationEngine`:
/// - Workflow definitions and instances (create, transition, inspect)
/// - Rule management
/// - Domain event ingestion

use crate::engine::AutomationEngine;
use std::sync::Arc;

// Workflow definition and instance endpoints
pub mod workflows;

// Rule management endpoints
pub mod rules;

// Domain event ingestion
pub mod events;

/// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AutomationEngine>,
}

// Re-export router builders
pub use events::create_event_routes;
pub use rules::create_rule_routes;
pub use workflows::create_workflow_routes;
