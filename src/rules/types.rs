/// Rule definitions and execution records
///
/// Rules are stored as JSON and evaluated by the rule engine whenever their
/// trigger event is published.

use crate::rules::condition::ConditionNode;
use crate::workflow::types::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declarative trigger → condition → actions rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique rule name (e.g., "flag-high-value-orders")
    pub name: String,
    /// Disabled rules never match
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher priorities are evaluated first
    #[serde(default)]
    pub priority: i32,
    /// Event name that causes this rule to be considered
    pub trigger: String,
    /// Condition tree; defaults to always-true
    #[serde(default)]
    pub condition: ConditionNode,
    /// Actions run sequentially when the condition holds
    pub actions: Vec<Action>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_enabled() -> bool {
    true
}

impl Rule {
    pub fn new(name: &str, trigger: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            priority: 0,
            trigger: trigger.to_string(),
            condition: ConditionNode::always(),
            actions: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<ConditionNode>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Named side effect with free-form parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Handler name (emit_event, log, transition, or any registered type)
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Action {
    pub fn new(action_type: &str, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            action_type: action_type.to_string(),
            params,
        }
    }

    /// Re-publish `event` carrying the triggering payload
    pub fn emit_event(event: &str) -> Self {
        Self::new("emit_event", serde_json::json!({ "event": event }))
    }

    pub fn log(level: &str, message: &str) -> Self {
        Self::new("log", serde_json::json!({ "level": level, "message": message }))
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Outcome of evaluating one rule for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// Conditions held and every action succeeded
    Executed,
    /// Conditions did not hold
    NotMatched,
    /// Conditions held but an action failed; remaining actions were skipped
    ActionFailed,
    /// Rule is disabled
    Disabled,
    /// Rule already fired earlier in this event chain
    CycleDetected,
}

/// Result of a single action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(rename = "type")]
    pub action_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Record of one rule evaluation, published as `automation.rule.executed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleExecution {
    pub rule: String,
    pub event: String,
    pub status: RuleStatus,
    pub matched: bool,
    pub executed: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_results: Vec<ActionResult>,
}

impl RuleExecution {
    pub fn skipped(rule: &str, event: &str, status: RuleStatus) -> Self {
        Self {
            rule: rule.to_string(),
            event: event.to_string(),
            status,
            matched: false,
            executed: false,
            duration_ms: 0,
            error: None,
            action_results: Vec::new(),
        }
    }
}
