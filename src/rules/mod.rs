/// Rule engine layer
///
/// Rules react to domain events: when an event named by a rule's trigger is
/// published, the rule's condition tree is evaluated against the event payload
/// and, when it holds, the rule's actions run in order.

pub mod action;
pub mod condition;
pub mod engine;
pub mod storage;
pub mod types;

pub use action::{ActionContext, ActionDispatcher, ActionHandler};
pub use condition::{Condition, ConditionEvaluator, ConditionNode, LogicalOperator};
pub use engine::RuleEngine;
pub use storage::RuleStorage;
pub use types::{Action, ActionResult, Rule, RuleExecution, RuleStatus};
