/// Automation core: workflow state machines and declarative event rules
///
/// This library provides a finite-state-machine runtime for business entities
/// (orders, tickets, approvals) plus a rule engine that reacts to domain events
/// with conditional actions. The two meet on an in-process event bus.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Domain events, cascade trails and the in-process bus
pub mod events;

// Workflow definitions, instances, registry and persistence
pub mod workflow;

// State machine runtime - guards, hooks and the transition coordinator
pub mod runtime;

// Declarative rules - conditions, actions and the rule engine
pub mod rules;

// Wiring component that owns everything above
pub mod engine;

// HTTP API layer - REST endpoints over the engine
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use engine::AutomationEngine;
pub use error::{AutomationError, Result};
pub use events::{DomainEvent, EventBus, EventSubscriber};
pub use rules::{Action, Condition, ConditionNode, Rule, RuleExecution, RuleStatus};
pub use runtime::{FnGuard, FnHook, Guard, Hook, HookContext};
pub use server::start_server;
pub use workflow::{Transition, TransitionContext, WorkflowDefinition, WorkflowInstance};
