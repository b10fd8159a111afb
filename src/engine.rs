/// Automation engine: the wiring component
///
/// Owns the definition registry, instance store, guard/hook registry, event
/// bus, transition coordinator, action dispatcher and rule engine. Nothing is
/// global; each `AutomationEngine` is an isolated world, so tests can build
/// as many as they like.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{DomainEvent, EventBus, EventSubscriber};
use crate::rules::action::{ActionDispatcher, ActionHandler, TransitionActionHandler};
use crate::rules::{Rule, RuleEngine, RuleExecution, RuleStorage};
use crate::runtime::{Guard, HandlerRegistry, Hook, TransitionCoordinator};
use crate::workflow::{
    AvailableTransition, DefinitionStorage, HistoryEntry, MemoryInstanceStore, SqliteInstanceStore,
    TransitionContext, WorkflowDefinition, WorkflowDefinitionRegistry, WorkflowInstance,
    WorkflowInstanceStore,
};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct AutomationEngine {
    config: EngineConfig,
    registry: Arc<WorkflowDefinitionRegistry>,
    bus: Arc<EventBus>,
    coordinator: Arc<TransitionCoordinator>,
    rules: Arc<RuleEngine>,
    subscribed: AtomicBool,
}

impl std::fmt::Debug for AutomationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationEngine")
            .field("config", &self.config)
            .field("workflows", &self.registry.list().len())
            .field("rules", &self.rules)
            .finish()
    }
}

impl AutomationEngine {
    /// In-memory engine; nothing survives the process
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(WorkflowDefinitionRegistry::new(config.strict_transitions));
        Self::assemble(config, registry, Arc::new(MemoryInstanceStore::new()), None)
    }

    /// SQLite-backed engine; creates the schemas if missing
    pub async fn with_sqlite(pool: SqlitePool, config: EngineConfig) -> Result<Self> {
        tracing::info!("📋 Initializing SQLite storage");
        let definitions = DefinitionStorage::new(pool.clone());
        definitions.init_schema().await?;

        let instances = SqliteInstanceStore::new(pool.clone());
        instances.init_schema().await?;

        let rules = RuleStorage::new(pool);
        rules.init_schema().await?;

        let registry = Arc::new(WorkflowDefinitionRegistry::with_storage(
            config.strict_transitions,
            definitions,
        ));
        Ok(Self::assemble(config, registry, Arc::new(instances), Some(rules)))
    }

    fn assemble(
        config: EngineConfig,
        registry: Arc<WorkflowDefinitionRegistry>,
        store: Arc<dyn WorkflowInstanceStore>,
        rule_storage: Option<RuleStorage>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let handlers = Arc::new(HandlerRegistry::new());
        let coordinator = Arc::new(TransitionCoordinator::new(
            Arc::clone(&registry),
            store,
            handlers,
            Arc::clone(&bus),
        ));

        let dispatcher = Arc::new(ActionDispatcher::with_builtins(Arc::clone(&bus)));
        dispatcher.register(
            "transition",
            Arc::new(TransitionActionHandler::new(Arc::clone(&coordinator))),
        );

        let mut rules = RuleEngine::new(
            dispatcher,
            Arc::clone(&bus),
            config.max_cascade_depth,
            config.rule_match_mode,
        );
        if let Some(storage) = rule_storage {
            rules = rules.with_storage(storage);
        }

        Self {
            config,
            registry,
            bus,
            coordinator,
            rules: Arc::new(rules),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Load persisted definitions and rules, then connect the rule engine to the bus
    pub async fn init(&self) -> Result<()> {
        tracing::info!("📥 Loading workflow definitions and rules from storage");
        self.registry.init_from_storage().await?;
        self.rules.init_from_storage().await?;

        // Connect once; a repeated init only reloads
        if !self.subscribed.swap(true, Ordering::SeqCst) {
            let subscriber: Arc<dyn EventSubscriber> = self.rules.clone();
            self.bus.subscribe(&subscriber);
        }

        tracing::info!(
            "✅ Automation engine ready ({} workflows, {} rules)",
            self.registry.list().len(),
            self.rules.list_rules().len()
        );
        Ok(())
    }

    /// Disconnect subscribers; in-flight calls finish on their own
    pub fn shutdown(&self) {
        self.bus.clear_subscribers();
        self.subscribed.store(false, Ordering::SeqCst);
        tracing::info!("🛑 Automation engine shut down");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn coordinator(&self) -> &Arc<TransitionCoordinator> {
        &self.coordinator
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    pub fn register_guard(&self, name: &str, guard: Arc<dyn Guard>) {
        self.coordinator.handlers().register_guard(name, guard);
    }

    pub fn register_hook(&self, name: &str, hook: Arc<dyn Hook>) {
        self.coordinator.handlers().register_hook(name, hook);
    }

    pub fn register_action(&self, action_type: &str, handler: Arc<dyn ActionHandler>) {
        self.rules.dispatcher().register(action_type, handler);
    }

    pub async fn define_workflow(&self, definition: WorkflowDefinition) -> Result<()> {
        self.registry.define_workflow(definition).await
    }

    pub fn lookup_workflow(&self, name: &str) -> Result<Arc<WorkflowDefinition>> {
        self.registry.lookup(name)
    }

    pub fn list_workflows(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.registry.list()
    }

    pub async fn create_instance(
        &self,
        workflow: &str,
        entity_id: &str,
        data: Value,
        actor_id: Option<&str>,
    ) -> Result<WorkflowInstance> {
        self.coordinator.create_instance(workflow, entity_id, data, actor_id).await
    }

    pub async fn transition(
        &self,
        workflow: &str,
        entity_id: &str,
        event: &str,
        context: TransitionContext,
    ) -> Result<WorkflowInstance> {
        self.coordinator.transition(workflow, entity_id, event, context).await
    }

    pub async fn can_transition(
        &self,
        workflow: &str,
        entity_id: &str,
        event: &str,
        context: &TransitionContext,
    ) -> bool {
        self.coordinator.can_transition(workflow, entity_id, event, context).await
    }

    pub async fn get_available_transitions(
        &self,
        workflow: &str,
        entity_id: &str,
    ) -> Result<Vec<AvailableTransition>> {
        self.coordinator.get_available_transitions(workflow, entity_id).await
    }

    pub async fn get_instance(&self, workflow: &str, entity_id: &str) -> Result<Option<WorkflowInstance>> {
        self.coordinator.get_instance(workflow, entity_id).await
    }

    pub async fn get_history(&self, workflow: &str, entity_id: &str) -> Result<Option<Vec<HistoryEntry>>> {
        self.coordinator.get_history(workflow, entity_id).await
    }

    pub async fn create_rule(&self, rule: Rule) -> Result<Rule> {
        self.rules.create_rule(rule).await
    }

    /// Evaluate rules for `name` directly and return their records
    pub async fn on_event(&self, name: &str, payload: Value) -> Result<Vec<RuleExecution>> {
        self.rules.on_event(name, payload).await
    }

    /// Publish `name` on the bus: observers and every subscriber see it
    pub async fn publish(&self, name: &str, payload: Value) {
        self.bus.publish(DomainEvent::new(name, payload)).await;
    }
}
