//! Action dispatch
//!
//! Actions are looked up by type in a handler map, so new side effects plug in
//! without touching the dispatcher. Built-ins:
//! - `emit_event`: re-publish a named event (rule chaining)
//! - `log`: write a leveled tracing record
//! - `transition`: fire a workflow transition (registered by the engine)

use crate::error::{AutomationError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::rules::condition::resolve_path;
use crate::rules::types::{Action, Rule};
use crate::runtime::TransitionCoordinator;
use crate::workflow::types::TransitionContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What an action sees: the rule that matched and the event that triggered it
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub rule: &'a Rule,
    pub event: &'a DomainEvent,
}

/// Implementation of one action type
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the action; the returned value is recorded on the rule execution
    async fn run(&self, action: &Action, ctx: &ActionContext<'_>) -> anyhow::Result<Value>;
}

/// Routes actions to registered handlers by type
#[derive(Default)]
pub struct ActionDispatcher {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("types", &self.registered_types())
            .finish()
    }
}

impl ActionDispatcher {
    /// Empty dispatcher with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with the `emit_event` and `log` built-ins
    pub fn with_builtins(bus: Arc<EventBus>) -> Self {
        let dispatcher = Self::new();
        dispatcher.register("emit_event", Arc::new(EmitEventHandler::new(bus)));
        dispatcher.register("log", Arc::new(LogHandler));
        dispatcher
    }

    pub fn register(&self, action_type: &str, handler: Arc<dyn ActionHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(action_type.to_string(), handler);
        }
    }

    pub fn has_handler(&self, action_type: &str) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(action_type))
            .unwrap_or(false)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    /// Run `action` through its handler
    pub async fn dispatch(&self, action: &Action, ctx: &ActionContext<'_>) -> Result<Value> {
        let handler = self
            .handlers
            .read()
            .ok()
            .and_then(|h| h.get(&action.action_type).cloned())
            .ok_or_else(|| AutomationError::RuleAction {
                rule: ctx.rule.name.clone(),
                action: action.action_type.clone(),
                reason: "no handler registered for this action type".to_string(),
            })?;

        handler
            .run(action, ctx)
            .await
            .map_err(|e| AutomationError::RuleAction {
                rule: ctx.rule.name.clone(),
                action: action.action_type.clone(),
                reason: e.to_string(),
            })
    }
}

/// `emit_event`: publishes `params.event` as a child of the triggering event
///
/// Params: `event` (required), `payload` (optional, defaults to the
/// triggering payload).
#[derive(Debug)]
pub struct EmitEventHandler {
    bus: Arc<EventBus>,
}

impl EmitEventHandler {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ActionHandler for EmitEventHandler {
    async fn run(&self, action: &Action, ctx: &ActionContext<'_>) -> anyhow::Result<Value> {
        let name = action
            .param_str("event")
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("emit_event requires an 'event' parameter"))?;

        let payload = action
            .params
            .get("payload")
            .cloned()
            .unwrap_or_else(|| ctx.event.payload.clone());

        let event = DomainEvent::new(name, payload).with_trail(ctx.event.trail.child(&ctx.rule.name));
        let event_id = event.id;
        self.bus.publish(event).await;

        Ok(json!({ "event": name, "event_id": event_id }))
    }
}

/// `log`: writes `params.message` at `params.level` (default info)
#[derive(Debug)]
pub struct LogHandler;

#[async_trait]
impl ActionHandler for LogHandler {
    async fn run(&self, action: &Action, ctx: &ActionContext<'_>) -> anyhow::Result<Value> {
        let message = action.param_str("message").unwrap_or("rule matched");
        let level = action.param_str("level").unwrap_or("info");
        let (rule, event) = (ctx.rule.name.as_str(), ctx.event.name.as_str());

        match level {
            "trace" => tracing::trace!(rule, event, "{}", message),
            "debug" => tracing::debug!(rule, event, "{}", message),
            "info" => tracing::info!(rule, event, "{}", message),
            "warn" => tracing::warn!(rule, event, "{}", message),
            "error" => tracing::error!(rule, event, "{}", message),
            other => anyhow::bail!("unknown log level '{}'", other),
        }

        Ok(json!({ "level": level, "message": message }))
    }
}

/// `transition`: fires a workflow transition for an entity named by the event
///
/// Params: `workflow`, `event`, and either `entity_id` (literal) or
/// `entity_id_field` (dot-path into the triggering payload).
#[derive(Debug)]
pub struct TransitionActionHandler {
    coordinator: Arc<TransitionCoordinator>,
}

impl TransitionActionHandler {
    pub fn new(coordinator: Arc<TransitionCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl ActionHandler for TransitionActionHandler {
    async fn run(&self, action: &Action, ctx: &ActionContext<'_>) -> anyhow::Result<Value> {
        let workflow = action
            .param_str("workflow")
            .ok_or_else(|| anyhow::anyhow!("transition requires a 'workflow' parameter"))?;
        let event = action
            .param_str("event")
            .ok_or_else(|| anyhow::anyhow!("transition requires an 'event' parameter"))?;

        let entity_id = match (action.param_str("entity_id"), action.param_str("entity_id_field")) {
            (Some(id), _) => id.to_string(),
            (None, Some(path)) => match resolve_path(&ctx.event.payload, path) {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => anyhow::bail!("payload field '{}' does not hold an entity id", path),
            },
            (None, None) => anyhow::bail!("transition requires 'entity_id' or 'entity_id_field'"),
        };

        let mut context = TransitionContext::new()
            .with("rule", json!(ctx.rule.name))
            .with("trigger_event", json!(ctx.event.name))
            .with_trail(ctx.event.trail.child(&ctx.rule.name));
        context.actor_id = Some(format!("rule:{}", ctx.rule.name));

        let instance = self.coordinator.transition(workflow, &entity_id, event, context).await?;

        Ok(json!({
            "workflow": workflow,
            "entity_id": entity_id,
            "state": instance.current_state,
        }))
    }
}
