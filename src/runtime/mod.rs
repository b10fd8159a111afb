/// Workflow Runtime
///
/// This module provides the state machine runtime:
/// - Guard and hook extension traits with a name-keyed registry
/// - The transition coordinator (selection, guards, hooks, commit, notify)

// Guard/hook traits and their registry
pub mod handlers;

// Single-transition orchestration
pub mod coordinator;

// Re-export main types
pub use coordinator::TransitionCoordinator;
pub use handlers::{FnGuard, FnHook, Guard, HandlerRegistry, Hook, HookContext};
