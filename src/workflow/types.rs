/// Core workflow type definitions
///
/// Defines workflow definitions (states + transitions), the per-entity instance
/// record and its append-only history. Everything is serde-serializable so the
/// same types flow through sqlite JSON columns and the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::events::CascadeTrail;

/// Event name recorded on the history entry written at instance creation
pub const CREATED_EVENT: &str = "__created__";

/// Open document used for metadata on definitions, instances and rules
///
/// Known fields are typed; anything else lands in `extra` and round-trips
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A named finite-state machine reusable across many entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow name (e.g., "order-processing")
    #[serde(default)]
    pub name: String,
    /// Kind of entity this workflow governs (e.g., "order")
    pub entity_type: String,
    /// State every new instance starts in
    pub initial_state: String,
    /// Declared states; transitions may only reference these
    pub states: BTreeSet<String>,
    /// Transitions in declaration order (first declared wins on ambiguity)
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Edge between states, fired by a named event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    /// Source states this transition can fire from
    pub from: Vec<String>,
    /// Target state
    pub to: String,
    /// Triggering event name
    pub event: String,
    /// Registered guard names, all must pass, evaluated in order
    #[serde(default)]
    pub guards: Vec<String>,
    /// Registered hook names run before commit; a failure aborts
    #[serde(default)]
    pub before_hooks: Vec<String>,
    /// Registered hook names run after commit; failures are only logged
    #[serde(default)]
    pub after_hooks: Vec<String>,
}

impl Transition {
    pub fn new(from: &[&str], event: &str, to: &str) -> Self {
        Self {
            from: from.iter().map(|s| s.to_string()).collect(),
            to: to.to_string(),
            event: event.to_string(),
            guards: Vec::new(),
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
        }
    }

    pub fn with_guard(mut self, name: &str) -> Self {
        self.guards.push(name.to_string());
        self
    }

    pub fn with_before_hook(mut self, name: &str) -> Self {
        self.before_hooks.push(name.to_string());
        self
    }

    pub fn with_after_hook(mut self, name: &str) -> Self {
        self.after_hooks.push(name.to_string());
        self
    }

    /// Whether this transition fires for `event` while in `state`
    pub fn matches(&self, state: &str, event: &str) -> bool {
        self.event == event && self.from.iter().any(|s| s == state)
    }
}

impl WorkflowDefinition {
    pub fn new(name: &str, entity_type: &str, initial_state: &str, states: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            initial_state: initial_state.to_string(),
            states: states.iter().map(|s| s.to_string()).collect(),
            transitions: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Transitions that fire for `event` from `state`, in declaration order
    pub fn candidates<'a>(&'a self, state: &'a str, event: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| t.matches(state, event))
    }

    /// Transitions whose source set contains `state`, regardless of event
    pub fn outgoing<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a Transition> {
        self.transitions.iter().filter(move |t| t.from.iter().any(|s| s == state))
    }
}

/// One occurrence of a workflow bound to an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub workflow_name: String,
    pub entity_id: String,
    pub current_state: String,
    /// Optimistic concurrency counter; equals the number of history entries
    pub version: i64,
    /// Entity data captured at creation
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of a state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Position in the instance history, starting at 1
    pub sequence: i64,
    /// None for the creation entry
    pub from_state: Option<String>,
    pub to_state: String,
    pub event: String,
    pub actor_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the transition context data
    #[serde(default)]
    pub context: Value,
}

/// Caller-supplied context for a transition
///
/// `data` is handed to guards and hooks and snapshotted into history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionContext {
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Event chain this transition is part of, when triggered by a rule
    #[serde(skip)]
    pub trail: CascadeTrail,
}

impl TransitionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor_id: &str) -> Self {
        self.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn with_trail(mut self, trail: CascadeTrail) -> Self {
        self.trail = trail;
        self
    }

    /// Snapshot stored on the history entry
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

/// Entry returned by `get_available_transitions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableTransition {
    pub event: String,
    pub to: String,
}
