/// Hot-reload workflow definition registry using ArcSwap
///
/// Provides lock-free reads and atomic updates of the in-memory definition map.
/// Each registration validates the definition, then swaps the entire map
/// pointer so concurrent transitions keep working against a consistent snapshot.

use crate::error::{AutomationError, Result};
use crate::workflow::{storage::DefinitionStorage, types::WorkflowDefinition};
use arc_swap::ArcSwap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Registry of named workflow definitions
///
/// Explicitly constructed and owned by the engine; several registries can
/// coexist (one per engine) without sharing state.
#[derive(Debug)]
pub struct WorkflowDefinitionRegistry {
    /// Key: workflow name, Value: validated definition
    definitions: ArcSwap<HashMap<String, Arc<WorkflowDefinition>>>,

    /// Reject definitions where two transitions share a (state, event) pair
    strict_transitions: bool,

    /// Optional persistent storage for boot-time reloads
    storage: Option<DefinitionStorage>,
}

impl WorkflowDefinitionRegistry {
    /// Create an in-memory registry
    pub fn new(strict_transitions: bool) -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
            strict_transitions,
            storage: None,
        }
    }

    /// Create a registry that persists every registration
    pub fn with_storage(strict_transitions: bool, storage: DefinitionStorage) -> Self {
        Self {
            storage: Some(storage),
            ..Self::new(strict_transitions)
        }
    }

    /// Load all persisted definitions into memory
    ///
    /// Invalid stored definitions are skipped with an error log so one bad row
    /// cannot keep the engine from booting.
    pub async fn init_from_storage(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let stored = storage.load_all_definitions().await?;
        let mut loaded = HashMap::new();
        for (name, definition) in stored {
            match self.validate(&definition) {
                Ok(()) => {
                    loaded.insert(name, Arc::new(definition));
                }
                Err(e) => tracing::error!("❌ Skipping stored workflow '{}': {}", name, e),
            }
        }

        self.definitions.store(Arc::new(loaded));
        tracing::info!(
            "Initialized workflow registry with {} definitions",
            self.definitions.load().len()
        );

        Ok(())
    }

    /// Validate and register a definition, replacing any previous one with the same name
    pub async fn define_workflow(&self, definition: WorkflowDefinition) -> Result<()> {
        self.validate(&definition)?;

        if let Some(storage) = &self.storage {
            storage.save_definition(&definition).await?;
        }

        let name = definition.name.clone();
        let definition = Arc::new(definition);
        let previous = self.definitions.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(name.clone(), Arc::clone(&definition));
            next
        });

        if previous.contains_key(&name) {
            tracing::info!("🔥 Replaced workflow definition: {}", name);
        } else {
            tracing::info!("📋 Registered workflow definition: {}", name);
        }

        Ok(())
    }

    /// Get a definition by name (lock-free read)
    pub fn lookup(&self, name: &str) -> Result<Arc<WorkflowDefinition>> {
        self.definitions
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| AutomationError::NotFound(format!("workflow '{}'", name)))
    }

    /// All registered definitions, sorted by name
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut all: Vec<_> = self.definitions.load().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Remove a definition; existing instances and history are untouched
    pub async fn remove(&self, name: &str) -> Result<bool> {
        if let Some(storage) = &self.storage {
            storage.delete_definition(name).await?;
        }

        let previous = self.definitions.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(name);
            next
        });
        let removed = previous.contains_key(name);
        if removed {
            tracing::info!("Removed workflow definition: {}", name);
        }

        Ok(removed)
    }

    /// Check the structural invariants of a definition
    fn validate(&self, definition: &WorkflowDefinition) -> Result<()> {
        let name = &definition.name;
        if name.trim().is_empty() {
            return Err(AutomationError::Definition("workflow name must not be empty".to_string()));
        }
        if definition.states.is_empty() {
            return Err(AutomationError::Definition(format!(
                "workflow '{}' declares no states",
                name
            )));
        }
        if !definition.states.contains(&definition.initial_state) {
            return Err(AutomationError::Definition(format!(
                "workflow '{}': initial state '{}' is not declared",
                name, definition.initial_state
            )));
        }

        let mut seen: HashSet<(&str, &str)> = HashSet::new();
        for (idx, transition) in definition.transitions.iter().enumerate() {
            if transition.event.trim().is_empty() {
                return Err(AutomationError::Definition(format!(
                    "workflow '{}': transition #{} has no event",
                    name, idx
                )));
            }
            if transition.from.is_empty() {
                return Err(AutomationError::Definition(format!(
                    "workflow '{}': transition '{}' has no source states",
                    name, transition.event
                )));
            }
            for state in transition.from.iter().chain(std::iter::once(&transition.to)) {
                if !definition.states.contains(state) {
                    return Err(AutomationError::Definition(format!(
                        "workflow '{}': transition '{}' references unknown state '{}'",
                        name, transition.event, state
                    )));
                }
            }
            for source in &transition.from {
                if !seen.insert((source.as_str(), transition.event.as_str())) {
                    if self.strict_transitions {
                        return Err(AutomationError::Definition(format!(
                            "workflow '{}': more than one transition for event '{}' from state '{}'",
                            name, transition.event, source
                        )));
                    }
                    tracing::warn!(
                        "⚠️ Workflow '{}': ambiguous transitions for '{}' from '{}', first declared wins",
                        name,
                        transition.event,
                        source
                    );
                }
            }
        }

        let unreachable = unreachable_states(definition);
        if !unreachable.is_empty() {
            tracing::warn!(
                "⚠️ Workflow '{}': states unreachable from '{}': {:?}",
                name,
                definition.initial_state,
                unreachable
            );
        }

        Ok(())
    }
}

/// States that no sequence of transitions reaches from the initial state
pub fn unreachable_states(definition: &WorkflowDefinition) -> Vec<String> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();

    for state in &definition.states {
        index.insert(state.as_str(), graph.add_node(state.as_str()));
    }
    for transition in &definition.transitions {
        let Some(&to) = index.get(transition.to.as_str()) else {
            continue;
        };
        for source in &transition.from {
            if let Some(&from) = index.get(source.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    let Some(&start) = index.get(definition.initial_state.as_str()) else {
        return definition.states.iter().cloned().collect();
    };

    let mut reachable = HashSet::new();
    let mut dfs = Dfs::new(&graph, start);
    while let Some(node) = dfs.next(&graph) {
        reachable.insert(node);
    }

    definition
        .states
        .iter()
        .filter(|s| index.get(s.as_str()).map_or(true, |i| !reachable.contains(i)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::Transition;

    fn order_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("orders", "order", "PENDING", &["PENDING", "PAID", "CANCELLED"])
            .with_transition(Transition::new(&["PENDING"], "pay", "PAID"))
            .with_transition(Transition::new(&["PENDING", "PAID"], "cancel", "CANCELLED"))
    }

    #[tokio::test]
    async fn test_define_and_lookup() {
        let registry = WorkflowDefinitionRegistry::new(false);
        registry.define_workflow(order_definition()).await.unwrap();

        let def = registry.lookup("orders").unwrap();
        assert_eq!(def.initial_state, "PENDING");
        assert!(matches!(registry.lookup("missing"), Err(AutomationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_state_rejected() {
        let registry = WorkflowDefinitionRegistry::new(false);
        let def = order_definition().with_transition(Transition::new(&["PAID"], "ship", "SHIPPED"));

        let err = registry.define_workflow(def).await.unwrap_err();
        assert!(matches!(err, AutomationError::Definition(msg) if msg.contains("SHIPPED")));
        assert!(registry.lookup("orders").is_err());
    }

    #[tokio::test]
    async fn test_undeclared_initial_state_rejected() {
        let registry = WorkflowDefinitionRegistry::new(false);
        let mut def = order_definition();
        def.initial_state = "DRAFT".to_string();

        assert!(matches!(
            registry.define_workflow(def).await,
            Err(AutomationError::Definition(_))
        ));
    }

    #[tokio::test]
    async fn test_redefine_replaces() {
        let registry = WorkflowDefinitionRegistry::new(false);
        registry.define_workflow(order_definition()).await.unwrap();

        let mut updated = order_definition();
        updated.metadata.description = Some("v2".to_string());
        registry.define_workflow(updated).await.unwrap();

        assert_eq!(registry.list().len(), 1);
        assert_eq!(
            registry.lookup("orders").unwrap().metadata.description.as_deref(),
            Some("v2")
        );
    }

    #[tokio::test]
    async fn test_strict_mode_rejects_ambiguous_transitions() {
        let ambiguous = order_definition().with_transition(Transition::new(&["PENDING"], "pay", "CANCELLED"));

        let lenient = WorkflowDefinitionRegistry::new(false);
        lenient.define_workflow(ambiguous.clone()).await.unwrap();

        let strict = WorkflowDefinitionRegistry::new(true);
        assert!(matches!(
            strict.define_workflow(ambiguous).await,
            Err(AutomationError::Definition(_))
        ));
    }

    #[test]
    fn test_unreachable_states() {
        let def = WorkflowDefinition::new("wf", "thing", "A", &["A", "B", "C", "D"])
            .with_transition(Transition::new(&["A"], "next", "B"))
            .with_transition(Transition::new(&["D"], "next", "C"));

        assert_eq!(unreachable_states(&def), vec!["C".to_string(), "D".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_definitions_all_land() {
        let registry = Arc::new(WorkflowDefinitionRegistry::new(false));

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let mut def = order_definition();
                    def.name = format!("orders-{}", i);
                    registry.define_workflow(def).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.list().len(), 64);

        let removals: Vec<_> = (0..32)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.remove(&format!("orders-{}", i)).await })
            })
            .collect();
        for task in removals {
            assert!(task.await.unwrap().unwrap());
        }
        assert_eq!(registry.list().len(), 32);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = WorkflowDefinitionRegistry::new(false);
        registry.define_workflow(order_definition()).await.unwrap();

        assert!(registry.remove("orders").await.unwrap());
        assert!(!registry.remove("orders").await.unwrap());
        assert!(registry.list().is_empty());
    }
}
