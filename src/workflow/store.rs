//! Instance persistence contract
//!
//! The coordinator mutates instances exclusively through this trait. Two
//! backends ship with the crate: `MemoryInstanceStore` (tests, embedding) and
//! `SqliteInstanceStore` (see `storage`).

use crate::error::{AutomationError, Result};
use crate::workflow::types::{
    HistoryEntry, Metadata, WorkflowDefinition, WorkflowInstance, CREATED_EVENT,
};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Persistence for workflow instances and their append-only history
#[async_trait]
pub trait WorkflowInstanceStore: Send + Sync {
    /// Create an instance at the definition's initial state plus its creation
    /// history entry. Fails with `AlreadyExists` if the key is taken.
    async fn create_instance(
        &self,
        definition: &WorkflowDefinition,
        entity_id: &str,
        data: Value,
        actor_id: Option<&str>,
    ) -> Result<WorkflowInstance>;

    async fn get_instance(&self, workflow: &str, entity_id: &str) -> Result<Option<WorkflowInstance>>;

    /// History in sequence order, `None` if the instance does not exist
    async fn get_history(&self, workflow: &str, entity_id: &str) -> Result<Option<Vec<HistoryEntry>>>;

    /// Move `instance` to `new_state` and append `entry` as one atomic write.
    ///
    /// Fails with `ConcurrentModification` if the stored version no longer
    /// equals `instance.version`.
    async fn commit_transition(
        &self,
        instance: &WorkflowInstance,
        new_state: &str,
        entry: HistoryEntry,
    ) -> Result<WorkflowInstance>;

    async fn list_instances(&self, workflow: &str) -> Result<Vec<WorkflowInstance>>;
}

/// Build the instance and creation entry shared by every backend
pub(crate) fn new_instance(
    definition: &WorkflowDefinition,
    entity_id: &str,
    data: Value,
    actor_id: Option<&str>,
) -> (WorkflowInstance, HistoryEntry) {
    let now = Utc::now();
    let instance = WorkflowInstance {
        workflow_name: definition.name.clone(),
        entity_id: entity_id.to_string(),
        current_state: definition.initial_state.clone(),
        version: 1,
        data: data.clone(),
        metadata: Metadata::default(),
        created_at: now,
        updated_at: now,
    };
    let entry = HistoryEntry {
        sequence: 1,
        from_state: None,
        to_state: definition.initial_state.clone(),
        event: CREATED_EVENT.to_string(),
        actor_id: actor_id.map(str::to_string),
        timestamp: now,
        context: data,
    };
    (instance, entry)
}

pub(crate) fn already_exists(workflow: &str, entity_id: &str) -> AutomationError {
    AutomationError::AlreadyExists(format!("instance {}/{}", workflow, entity_id))
}

pub(crate) fn instance_not_found(workflow: &str, entity_id: &str) -> AutomationError {
    AutomationError::NotFound(format!("instance {}/{}", workflow, entity_id))
}

type InstanceKey = (String, String);

#[derive(Debug)]
struct StoredInstance {
    instance: WorkflowInstance,
    history: Vec<HistoryEntry>,
}

/// In-memory store; instance and history live under one lock so a commit is
/// a single critical section.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<HashMap<InstanceKey, StoredInstance>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowInstanceStore for MemoryInstanceStore {
    async fn create_instance(
        &self,
        definition: &WorkflowDefinition,
        entity_id: &str,
        data: Value,
        actor_id: Option<&str>,
    ) -> Result<WorkflowInstance> {
        let key = (definition.name.clone(), entity_id.to_string());
        let mut instances = self.instances.write().await;
        if instances.contains_key(&key) {
            return Err(already_exists(&definition.name, entity_id));
        }

        let (instance, entry) = new_instance(definition, entity_id, data, actor_id);
        instances.insert(
            key,
            StoredInstance {
                instance: instance.clone(),
                history: vec![entry],
            },
        );

        Ok(instance)
    }

    async fn get_instance(&self, workflow: &str, entity_id: &str) -> Result<Option<WorkflowInstance>> {
        let instances = self.instances.read().await;
        Ok(instances
            .get(&(workflow.to_string(), entity_id.to_string()))
            .map(|stored| stored.instance.clone()))
    }

    async fn get_history(&self, workflow: &str, entity_id: &str) -> Result<Option<Vec<HistoryEntry>>> {
        let instances = self.instances.read().await;
        Ok(instances
            .get(&(workflow.to_string(), entity_id.to_string()))
            .map(|stored| stored.history.clone()))
    }

    async fn commit_transition(
        &self,
        instance: &WorkflowInstance,
        new_state: &str,
        mut entry: HistoryEntry,
    ) -> Result<WorkflowInstance> {
        let key = (instance.workflow_name.clone(), instance.entity_id.clone());
        let mut instances = self.instances.write().await;
        let stored = instances
            .get_mut(&key)
            .ok_or_else(|| instance_not_found(&instance.workflow_name, &instance.entity_id))?;

        if stored.instance.version != instance.version {
            return Err(AutomationError::ConcurrentModification {
                workflow: instance.workflow_name.clone(),
                entity_id: instance.entity_id.clone(),
                expected: instance.version,
            });
        }

        let version = instance.version + 1;
        entry.sequence = version;
        stored.instance.current_state = new_state.to_string();
        stored.instance.version = version;
        stored.instance.updated_at = entry.timestamp;
        stored.history.push(entry);

        Ok(stored.instance.clone())
    }

    async fn list_instances(&self, workflow: &str) -> Result<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        let mut found: Vec<WorkflowInstance> = instances
            .values()
            .filter(|stored| stored.instance.workflow_name == workflow)
            .map(|stored| stored.instance.clone())
            .collect();
        found.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::Transition;
    use serde_json::json;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::new("orders", "order", "PENDING", &["PENDING", "PAID"])
            .with_transition(Transition::new(&["PENDING"], "pay", "PAID"))
    }

    fn entry(from: &str, to: &str, event: &str) -> HistoryEntry {
        HistoryEntry {
            sequence: 0,
            from_state: Some(from.to_string()),
            to_state: to.to_string(),
            event: event.to_string(),
            actor_id: Some("tester".to_string()),
            timestamp: Utc::now(),
            context: json!({}),
        }
    }

    #[tokio::test]
    async fn test_create_writes_creation_entry() {
        let store = MemoryInstanceStore::new();
        let instance = store
            .create_instance(&definition(), "o-1", json!({"total": 10}), Some("alice"))
            .await
            .unwrap();

        assert_eq!(instance.current_state, "PENDING");
        assert_eq!(instance.version, 1);

        let history = store.get_history("orders", "o-1").await.unwrap().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_state, None);
        assert_eq!(history[0].event, CREATED_EVENT);
        assert_eq!(history[0].actor_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_duplicate_create_leaves_state_alone() {
        let store = MemoryInstanceStore::new();
        let def = definition();
        let first = store.create_instance(&def, "o-1", json!({}), None).await.unwrap();
        store.commit_transition(&first, "PAID", entry("PENDING", "PAID", "pay")).await.unwrap();

        let err = store.create_instance(&def, "o-1", json!({}), None).await.unwrap_err();
        assert!(matches!(err, AutomationError::AlreadyExists(_)));

        let current = store.get_instance("orders", "o-1").await.unwrap().unwrap();
        assert_eq!(current.current_state, "PAID");
        assert_eq!(store.get_history("orders", "o-1").await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stale_commit_is_rejected() {
        let store = MemoryInstanceStore::new();
        let stale = store.create_instance(&definition(), "o-1", json!({}), None).await.unwrap();

        let updated = store
            .commit_transition(&stale, "PAID", entry("PENDING", "PAID", "pay"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let err = store
            .commit_transition(&stale, "PAID", entry("PENDING", "PAID", "pay"))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ConcurrentModification { expected: 1, .. }));
        assert_eq!(store.get_history("orders", "o-1").await.unwrap().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_instance() {
        let store = MemoryInstanceStore::new();
        assert!(store.get_instance("orders", "nope").await.unwrap().is_none());
        assert!(store.get_history("orders", "nope").await.unwrap().is_none());
        assert!(store.list_instances("orders").await.unwrap().is_empty());
    }
}
