/// SQLite persistence for rule definitions
///
/// Rules are stored as JSON keyed by name, with the trigger, priority and
/// enabled flag mirrored into columns for indexed lookups.

use crate::error::Result;
use crate::rules::types::Rule;
use sqlx::{sqlite::SqlitePool, Row};

/// SQLite-based rule storage
#[derive(Debug, Clone)]
pub struct RuleStorage {
    pool: SqlitePool,
}

impl RuleStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the rules table. Safe to call multiple times.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automation_rules (
                name TEXT PRIMARY KEY,
                trigger_event TEXT NOT NULL,
                priority INTEGER NOT NULL,
                enabled BOOLEAN NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_trigger ON automation_rules(trigger_event)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or replace a rule (UPSERT)
    pub async fn save_rule(&self, rule: &Rule) -> Result<()> {
        let definition_json = serde_json::to_string(rule)?;

        sqlx::query(
            r#"
            INSERT INTO automation_rules (name, trigger_event, priority, enabled, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(name) DO UPDATE SET
                trigger_event = excluded.trigger_event,
                priority = excluded.priority,
                enabled = excluded.enabled,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&rule.name)
        .bind(&rule.trigger)
        .bind(rule.priority)
        .bind(rule.enabled)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All stored rules in insertion order; undecodable rows are logged and skipped
    pub async fn load_all_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query("SELECT name, definition FROM automation_rules ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("name");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<Rule>(&definition_json) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::error!("❌ Skipping undecodable rule '{}': {}", name, e),
            }
        }

        Ok(rules)
    }

    pub async fn delete_rule(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM automation_rules WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
