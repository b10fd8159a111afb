/// SQLite persistence layer for workflow definitions, instances and history
///
/// Definitions are stored as JSON for flexibility. Instances keep their
/// current state and version in indexed columns; history is an append-only
/// table keyed by (workflow, entity, sequence). State changes and their
/// history rows are written in one transaction.

use crate::error::{AutomationError, Result};
use crate::workflow::store::{already_exists, instance_not_found, new_instance, WorkflowInstanceStore};
use crate::workflow::types::{HistoryEntry, WorkflowDefinition, WorkflowInstance};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row,
};
use std::collections::HashMap;

/// SQLite-based workflow definition storage
#[derive(Debug, Clone)]
pub struct DefinitionStorage {
    /// SQLite connection pool
    pool: SqlitePool,
}

impl DefinitionStorage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the definition schema. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                name TEXT PRIMARY KEY,
                entity_type TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new definition or replace the existing one (UPSERT)
    pub async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(definition)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (name, entity_type, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(name) DO UPDATE SET
                entity_type = excluded.entity_type,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&definition.name)
        .bind(&definition.entity_type)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load all definitions, keyed by name; undecodable rows are logged and skipped
    pub async fn load_all_definitions(&self) -> Result<HashMap<String, WorkflowDefinition>> {
        let rows = sqlx::query("SELECT name, definition FROM workflow_definitions")
            .fetch_all(&self.pool)
            .await?;

        let mut definitions = HashMap::new();
        for row in rows {
            let name: String = row.get("name");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<WorkflowDefinition>(&definition_json) {
                Ok(definition) => {
                    definitions.insert(name, definition);
                }
                Err(e) => tracing::error!("❌ Skipping undecodable workflow definition '{}': {}", name, e),
            }
        }

        Ok(definitions)
    }

    /// Delete a definition by name
    pub async fn delete_definition(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_definitions WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// SQLite-backed `WorkflowInstanceStore`
#[derive(Debug, Clone)]
pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl SqliteInstanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the instance and history tables. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_instances (
                workflow_name TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                current_state TEXT NOT NULL,
                version INTEGER NOT NULL,
                data JSON NOT NULL,
                metadata JSON NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (workflow_name, entity_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_history (
                workflow_name TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                from_state TEXT,
                to_state TEXT NOT NULL,
                event TEXT NOT NULL,
                actor_id TEXT,
                context JSON NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (workflow_name, entity_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_instances_state ON workflow_instances(workflow_name, current_state)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AutomationError::Validation(format!("invalid stored timestamp '{}': {}", raw, e)))
}

fn instance_from_row(row: &SqliteRow) -> Result<WorkflowInstance> {
    let data: String = row.get("data");
    let metadata: String = row.get("metadata");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(WorkflowInstance {
        workflow_name: row.get("workflow_name"),
        entity_id: row.get("entity_id"),
        current_state: row.get("current_state"),
        version: row.get("version"),
        data: serde_json::from_str(&data)?,
        metadata: serde_json::from_str(&metadata)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn history_from_row(row: &SqliteRow) -> Result<HistoryEntry> {
    let context: String = row.get("context");
    let created_at: String = row.get("created_at");

    Ok(HistoryEntry {
        sequence: row.get("sequence"),
        from_state: row.get("from_state"),
        to_state: row.get("to_state"),
        event: row.get("event"),
        actor_id: row.get("actor_id"),
        timestamp: parse_timestamp(&created_at)?,
        context: serde_json::from_str(&context)?,
    })
}

const INSERT_HISTORY: &str = r#"
    INSERT INTO workflow_history
        (workflow_name, entity_id, sequence, from_state, to_state, event, actor_id, context, created_at)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

#[async_trait]
impl WorkflowInstanceStore for SqliteInstanceStore {
    async fn create_instance(
        &self,
        definition: &WorkflowDefinition,
        entity_id: &str,
        data: Value,
        actor_id: Option<&str>,
    ) -> Result<WorkflowInstance> {
        let (instance, entry) = new_instance(definition, entity_id, data, actor_id);
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_instances
                (workflow_name, entity_id, current_state, version, data, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(workflow_name, entity_id) DO NOTHING
            "#,
        )
        .bind(&instance.workflow_name)
        .bind(&instance.entity_id)
        .bind(&instance.current_state)
        .bind(instance.version)
        .bind(serde_json::to_string(&instance.data)?)
        .bind(serde_json::to_string(&instance.metadata)?)
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(already_exists(&definition.name, entity_id));
        }

        sqlx::query(INSERT_HISTORY)
            .bind(&instance.workflow_name)
            .bind(&instance.entity_id)
            .bind(entry.sequence)
            .bind(&entry.from_state)
            .bind(&entry.to_state)
            .bind(&entry.event)
            .bind(&entry.actor_id)
            .bind(serde_json::to_string(&entry.context)?)
            .bind(entry.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(instance)
    }

    async fn get_instance(&self, workflow: &str, entity_id: &str) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE workflow_name = ? AND entity_id = ?")
            .bind(workflow)
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn get_history(&self, workflow: &str, entity_id: &str) -> Result<Option<Vec<HistoryEntry>>> {
        if self.get_instance(workflow, entity_id).await?.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT * FROM workflow_history WHERE workflow_name = ? AND entity_id = ? ORDER BY sequence ASC",
        )
        .bind(workflow)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        let history = rows.iter().map(history_from_row).collect::<Result<Vec<_>>>()?;
        Ok(Some(history))
    }

    async fn commit_transition(
        &self,
        instance: &WorkflowInstance,
        new_state: &str,
        mut entry: HistoryEntry,
    ) -> Result<WorkflowInstance> {
        let version = instance.version + 1;
        entry.sequence = version;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE workflow_instances
            SET current_state = ?, version = ?, updated_at = ?
            WHERE workflow_name = ? AND entity_id = ? AND version = ?
            "#,
        )
        .bind(new_state)
        .bind(version)
        .bind(entry.timestamp.to_rfc3339())
        .bind(&instance.workflow_name)
        .bind(&instance.entity_id)
        .bind(instance.version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return match self.get_instance(&instance.workflow_name, &instance.entity_id).await? {
                Some(_) => Err(AutomationError::ConcurrentModification {
                    workflow: instance.workflow_name.clone(),
                    entity_id: instance.entity_id.clone(),
                    expected: instance.version,
                }),
                None => Err(instance_not_found(&instance.workflow_name, &instance.entity_id)),
            };
        }

        sqlx::query(INSERT_HISTORY)
            .bind(&instance.workflow_name)
            .bind(&instance.entity_id)
            .bind(entry.sequence)
            .bind(&entry.from_state)
            .bind(&entry.to_state)
            .bind(&entry.event)
            .bind(&entry.actor_id)
            .bind(serde_json::to_string(&entry.context)?)
            .bind(entry.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let mut committed = instance.clone();
        committed.current_state = new_state.to_string();
        committed.version = version;
        committed.updated_at = entry.timestamp;
        Ok(committed)
    }

    async fn list_instances(&self, workflow: &str) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query("SELECT * FROM workflow_instances WHERE workflow_name = ? ORDER BY entity_id")
            .bind(workflow)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(instance_from_row).collect()
    }
}
