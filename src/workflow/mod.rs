/// Workflow Management Layer
///
/// This module handles workflow definitions and instance persistence:
/// - Type definitions (WorkflowDefinition, Transition, WorkflowInstance, HistoryEntry)
/// - Lock-free definition registry using ArcSwap
/// - Instance store contract with in-memory and SQLite backends

// Core workflow type definitions
pub mod types;

// Hot-reload definition registry
pub mod registry;

// Instance store trait and in-memory backend
pub mod store;

// SQLite persistence for definitions, instances and history
pub mod storage;

pub use registry::WorkflowDefinitionRegistry;
pub use storage::{DefinitionStorage, SqliteInstanceStore};
pub use store::{MemoryInstanceStore, WorkflowInstanceStore};
pub use types::{
    AvailableTransition, HistoryEntry, Metadata, Transition, TransitionContext, WorkflowDefinition,
    WorkflowInstance,
};
