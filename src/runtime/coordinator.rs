/// Transition coordinator: the state machine core
///
/// Orchestrates a single transition: candidate selection, guards, before-hooks,
/// atomic commit, after-hooks and notification. Calls for the same
/// (workflow, entity) are serialized by a per-key async mutex; unrelated
/// entities never contend.

use crate::error::{AutomationError, Result};
use crate::events::{workflow_event_name, DomainEvent, EventBus};
use crate::runtime::handlers::{HandlerRegistry, HookContext};
use crate::workflow::store::{instance_not_found, WorkflowInstanceStore};
use crate::workflow::types::{
    AvailableTransition, HistoryEntry, Transition, TransitionContext, WorkflowDefinition,
    WorkflowInstance,
};
use crate::workflow::WorkflowDefinitionRegistry;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type InstanceKey = (String, String);

/// Per-(workflow, entity) async locks, pruned once nobody holds or waits on them
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<InstanceKey, Arc<AsyncMutex<()>>>>,
}

struct KeyGuard<'a> {
    owner: &'a KeyedLocks,
    key: InstanceKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    async fn acquire(&self, workflow: &str, entity_id: &str) -> KeyGuard<'_> {
        let key = (workflow.to_string(), entity_id.to_string());
        let lock = match self.locks.lock() {
            Ok(mut locks) => Arc::clone(locks.entry(key.clone()).or_default()),
            Err(poisoned) => Arc::clone(poisoned.into_inner().entry(key.clone()).or_default()),
        };
        let guard = lock.lock_owned().await;

        KeyGuard {
            owner: self,
            key,
            guard: Some(guard),
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut locks) = self.owner.locks.lock() {
            // Only the map's own reference left: nobody holds or waits
            if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&self.key);
            }
        }
    }
}

/// Runs transitions against registered definitions and stored instances
pub struct TransitionCoordinator {
    registry: Arc<WorkflowDefinitionRegistry>,
    store: Arc<dyn WorkflowInstanceStore>,
    handlers: Arc<HandlerRegistry>,
    bus: Arc<EventBus>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for TransitionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionCoordinator")
            .field("registry", &self.registry)
            .field("handlers", &self.handlers)
            .field("active_locks", &self.locks.len())
            .finish()
    }
}

impl TransitionCoordinator {
    pub fn new(
        registry: Arc<WorkflowDefinitionRegistry>,
        store: Arc<dyn WorkflowInstanceStore>,
        handlers: Arc<HandlerRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            store,
            handlers,
            bus,
            locks: KeyedLocks::default(),
        }
    }

    pub fn registry(&self) -> &Arc<WorkflowDefinitionRegistry> {
        &self.registry
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Create the instance for `entity_id` at the workflow's initial state
    pub async fn create_instance(
        &self,
        workflow: &str,
        entity_id: &str,
        data: Value,
        actor_id: Option<&str>,
    ) -> Result<WorkflowInstance> {
        let definition = self.registry.lookup(workflow)?;
        let instance = self.store.create_instance(&definition, entity_id, data, actor_id).await?;

        tracing::info!(
            "🆕 Created instance {}/{} in state '{}'",
            workflow,
            entity_id,
            instance.current_state
        );

        Ok(instance)
    }

    pub async fn get_instance(&self, workflow: &str, entity_id: &str) -> Result<Option<WorkflowInstance>> {
        self.store.get_instance(workflow, entity_id).await
    }

    pub async fn get_history(&self, workflow: &str, entity_id: &str) -> Result<Option<Vec<HistoryEntry>>> {
        self.store.get_history(workflow, entity_id).await
    }

    pub async fn list_instances(&self, workflow: &str) -> Result<Vec<WorkflowInstance>> {
        self.registry.lookup(workflow)?;
        self.store.list_instances(workflow).await
    }

    /// Fire `event` on the instance of `workflow` bound to `entity_id`
    ///
    /// Guard and before-hook failures leave instance and history untouched.
    /// After-hook failures are logged; the committed state stands.
    pub async fn transition(
        &self,
        workflow: &str,
        entity_id: &str,
        event: &str,
        context: TransitionContext,
    ) -> Result<WorkflowInstance> {
        let start_time = std::time::Instant::now();
        let definition = self.registry.lookup(workflow)?;

        let key_guard = self.locks.acquire(workflow, entity_id).await;

        let instance = self.load_instance(workflow, entity_id).await?;
        let transition = select_transition(&definition, &instance, event)?;
        let from_state = instance.current_state.clone();

        tracing::debug!(
            "🔄 {}/{}: '{}' selected {} → {}",
            workflow,
            entity_id,
            event,
            from_state,
            transition.to
        );

        let hook_ctx = HookContext {
            instance: &instance,
            event,
            from_state: &from_state,
            to_state: &transition.to,
            context: &context,
        };

        self.check_guards(transition, &hook_ctx).await?;
        self.run_before_hooks(transition, &hook_ctx).await?;

        let entry = HistoryEntry {
            sequence: instance.version + 1,
            from_state: Some(from_state.clone()),
            to_state: transition.to.clone(),
            event: event.to_string(),
            actor_id: context.actor_id.clone(),
            timestamp: Utc::now(),
            context: context.snapshot(),
        };
        let committed = self.store.commit_transition(&instance, &transition.to, entry).await?;

        // Serialization only needs to cover load → commit
        drop(key_guard);

        tracing::info!(
            "✅ {}/{}: {} → {} on '{}' in {:?}",
            workflow,
            entity_id,
            from_state,
            committed.current_state,
            event,
            start_time.elapsed()
        );

        let after_ctx = HookContext {
            instance: &committed,
            event,
            from_state: &from_state,
            to_state: &transition.to,
            context: &context,
        };
        self.run_after_hooks(transition, &after_ctx).await;

        let notification = DomainEvent::new(
            workflow_event_name(workflow, &committed.current_state),
            json!({
                "instance": committed,
                "event": event,
                "context": context.snapshot(),
            }),
        )
        .with_trail(context.trail.clone());
        self.bus.publish(notification).await;

        Ok(committed)
    }

    /// Whether `transition` would pass selection and guards right now
    ///
    /// Read-only with respect to the engine; guard side effects, if any, are
    /// the guard's own business.
    pub async fn can_transition(
        &self,
        workflow: &str,
        entity_id: &str,
        event: &str,
        context: &TransitionContext,
    ) -> bool {
        match self.check_transition(workflow, entity_id, event, context).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("{}/{}: '{}' not possible: {}", workflow, entity_id, event, e);
                false
            }
        }
    }

    async fn check_transition(
        &self,
        workflow: &str,
        entity_id: &str,
        event: &str,
        context: &TransitionContext,
    ) -> Result<()> {
        let definition = self.registry.lookup(workflow)?;
        let instance = self.load_instance(workflow, entity_id).await?;
        let transition = select_transition(&definition, &instance, event)?;

        let hook_ctx = HookContext {
            instance: &instance,
            event,
            from_state: &instance.current_state,
            to_state: &transition.to,
            context,
        };
        self.check_guards(transition, &hook_ctx).await
    }

    /// Every transition leaving the current state, regardless of guards
    pub async fn get_available_transitions(
        &self,
        workflow: &str,
        entity_id: &str,
    ) -> Result<Vec<AvailableTransition>> {
        let definition = self.registry.lookup(workflow)?;
        let instance = self.load_instance(workflow, entity_id).await?;

        Ok(definition
            .outgoing(&instance.current_state)
            .map(|t| AvailableTransition {
                event: t.event.clone(),
                to: t.to.clone(),
            })
            .collect())
    }

    async fn load_instance(&self, workflow: &str, entity_id: &str) -> Result<WorkflowInstance> {
        self.store
            .get_instance(workflow, entity_id)
            .await?
            .ok_or_else(|| instance_not_found(workflow, entity_id))
    }

    /// Evaluate guards in order; the first refusal stops evaluation
    async fn check_guards(&self, transition: &Transition, ctx: &HookContext<'_>) -> Result<()> {
        for name in &transition.guards {
            let guard = self
                .handlers
                .guard(name)
                .ok_or_else(|| AutomationError::Definition(format!("guard '{}' is not registered", name)))?;

            match guard.evaluate(ctx).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(AutomationError::GuardRejected {
                        guard: name.clone(),
                        reason: format!("guard returned false for '{}'", ctx.event),
                    })
                }
                Err(e) => {
                    return Err(AutomationError::GuardRejected {
                        guard: name.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    async fn run_before_hooks(&self, transition: &Transition, ctx: &HookContext<'_>) -> Result<()> {
        // Resolve every hook first so a missing registration cannot leave a
        // half-run hook chain behind
        let hooks = transition
            .before_hooks
            .iter()
            .map(|name| {
                self.handlers
                    .hook(name)
                    .map(|hook| (name, hook))
                    .ok_or_else(|| AutomationError::Definition(format!("hook '{}' is not registered", name)))
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, hook) in hooks {
            hook.run(ctx).await.map_err(|e| AutomationError::Hook {
                hook: name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn run_after_hooks(&self, transition: &Transition, ctx: &HookContext<'_>) {
        for name in &transition.after_hooks {
            let Some(hook) = self.handlers.hook(name) else {
                tracing::error!("❌ After-hook '{}' is not registered, skipping", name);
                continue;
            };
            if let Err(e) = hook.run(ctx).await {
                tracing::error!(
                    "❌ After-hook '{}' failed for {}/{} (transition kept): {}",
                    name,
                    ctx.instance.workflow_name,
                    ctx.instance.entity_id,
                    e
                );
            }
        }
    }
}

/// First declared transition matching the instance state and event
fn select_transition<'a>(
    definition: &'a WorkflowDefinition,
    instance: &WorkflowInstance,
    event: &str,
) -> Result<&'a Transition> {
    definition
        .transitions
        .iter()
        .find(|t| t.matches(&instance.current_state, event))
        .ok_or_else(|| AutomationError::InvalidTransition {
            state: instance.current_state.clone(),
            event: event.to_string(),
        })
}
