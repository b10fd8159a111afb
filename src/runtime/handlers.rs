//! Guard and hook extension points
//!
//! Transitions name their guards and hooks; implementations are registered
//! here under those names so they can be swapped or mocked without touching
//! definitions.

use crate::workflow::types::{TransitionContext, WorkflowInstance};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Everything a guard or hook sees about the transition in flight
#[derive(Debug, Clone)]
pub struct HookContext<'a> {
    pub instance: &'a WorkflowInstance,
    pub event: &'a str,
    pub from_state: &'a str,
    pub to_state: &'a str,
    pub context: &'a TransitionContext,
}

/// Read-only predicate gating a transition
#[async_trait]
pub trait Guard: Send + Sync {
    async fn evaluate(&self, ctx: &HookContext<'_>) -> anyhow::Result<bool>;
}

/// Side effect run before or after a commit
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, ctx: &HookContext<'_>) -> anyhow::Result<()>;
}

/// Guard built from a synchronous predicate
pub struct FnGuard<F>(pub F);

impl<F> FnGuard<F>
where
    F: Fn(&HookContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self(predicate)
    }
}

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&HookContext<'_>) -> bool + Send + Sync,
{
    async fn evaluate(&self, ctx: &HookContext<'_>) -> anyhow::Result<bool> {
        Ok((self.0)(ctx))
    }
}

/// Hook built from a synchronous closure
pub struct FnHook<F>(pub F);

impl<F> FnHook<F>
where
    F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(hook: F) -> Self {
        Self(hook)
    }
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    async fn run(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        (self.0)(ctx)
    }
}

/// Name → implementation tables for guards and hooks
#[derive(Default)]
pub struct HandlerRegistry {
    guards: RwLock<HashMap<String, Arc<dyn Guard>>>,
    hooks: RwLock<HashMap<String, Arc<dyn Hook>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guards = self.guards.read().map(|g| g.len()).unwrap_or(0);
        let hooks = self.hooks.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("HandlerRegistry")
            .field("guards", &guards)
            .field("hooks", &hooks)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_guard(&self, name: &str, guard: Arc<dyn Guard>) {
        if let Ok(mut guards) = self.guards.write() {
            guards.insert(name.to_string(), guard);
        }
    }

    pub fn register_hook(&self, name: &str, hook: Arc<dyn Hook>) {
        if let Ok(mut hooks) = self.hooks.write() {
            hooks.insert(name.to_string(), hook);
        }
    }

    pub fn guard(&self, name: &str) -> Option<Arc<dyn Guard>> {
        self.guards.read().ok()?.get(name).cloned()
    }

    pub fn hook(&self, name: &str) -> Option<Arc<dyn Hook>> {
        self.hooks.read().ok()?.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn instance() -> WorkflowInstance {
        WorkflowInstance {
            workflow_name: "orders".to_string(),
            entity_id: "o-1".to_string(),
            current_state: "PENDING".to_string(),
            version: 1,
            data: json!({}),
            metadata: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_fn_guard_reads_context() {
        let handlers = HandlerRegistry::new();
        handlers.register_guard(
            "has_payment",
            Arc::new(FnGuard(|ctx: &HookContext<'_>| ctx.context.data.contains_key("payment_id"))),
        );

        let instance = instance();
        let with_payment = TransitionContext::new().with("payment_id", json!("p-1"));
        let ctx = HookContext {
            instance: &instance,
            event: "pay",
            from_state: "PENDING",
            to_state: "PAID",
            context: &with_payment,
        };

        let guard = handlers.guard("has_payment").unwrap();
        assert!(guard.evaluate(&ctx).await.unwrap());
        assert!(handlers.guard("unknown").is_none());
    }
}
