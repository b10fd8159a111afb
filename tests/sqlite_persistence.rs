//! SQLite-backed engine: durability across engine restarts and optimistic
//! version checks on the instance store.

mod common;

use automation_core::config::EngineConfig;
use automation_core::rules::{Action, Condition, Rule};
use automation_core::workflow::{
    HistoryEntry, SqliteInstanceStore, Transition, TransitionContext, WorkflowDefinition,
    WorkflowInstanceStore,
};
use automation_core::{AutomationEngine, AutomationError};
use chrono::Utc;
use serde_json::json;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// One connection so every handle sees the same in-memory database
async fn memory_pool() -> SqlitePool {
    common::init_test_logging();
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap()
}

fn approval_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new("approval", "expense", "DRAFT", &["DRAFT", "SUBMITTED", "APPROVED"])
        .with_transition(Transition::new(&["DRAFT"], "submit", "SUBMITTED"))
        .with_transition(Transition::new(&["SUBMITTED"], "approve", "APPROVED"))
}

#[tokio::test]
async fn state_survives_an_engine_restart() {
    let pool = memory_pool().await;

    {
        let engine = AutomationEngine::with_sqlite(pool.clone(), EngineConfig::default())
            .await
            .unwrap();
        engine.init().await.unwrap();
        engine.define_workflow(approval_workflow()).await.unwrap();
        engine
            .create_instance("approval", "exp-1", json!({"amount": 42}), Some("bob"))
            .await
            .unwrap();
        engine
            .transition("approval", "exp-1", "submit", TransitionContext::new().with_actor("bob"))
            .await
            .unwrap();
        engine
            .create_rule(
                Rule::new("big-expense", "expense.filed")
                    .with_priority(5)
                    .with_condition(Condition::greater_than("amount", json!(100)))
                    .with_action(Action::log("warn", "large expense filed")),
            )
            .await
            .unwrap();
        engine.shutdown();
    }

    let engine = AutomationEngine::with_sqlite(pool, EngineConfig::default())
        .await
        .unwrap();
    engine.init().await.unwrap();

    assert_eq!(engine.lookup_workflow("approval").unwrap().initial_state, "DRAFT");
    let rule = engine.rules().get_rule("big-expense").unwrap();
    assert_eq!(rule.priority, 5);

    let instance = engine.get_instance("approval", "exp-1").await.unwrap().unwrap();
    assert_eq!(instance.current_state, "SUBMITTED");
    assert_eq!(instance.version, 2);
    assert_eq!(instance.data, json!({"amount": 42}));

    // Resumes where it left off
    let approved = engine
        .transition("approval", "exp-1", "approve", TransitionContext::new())
        .await
        .unwrap();
    assert_eq!(approved.current_state, "APPROVED");

    let history = engine.get_history("approval", "exp-1").await.unwrap().unwrap();
    let steps: Vec<(i64, &str)> = history.iter().map(|h| (h.sequence, h.to_state.as_str())).collect();
    assert_eq!(steps, vec![(1, "DRAFT"), (2, "SUBMITTED"), (3, "APPROVED")]);
    assert_eq!(history[0].actor_id.as_deref(), Some("bob"));
    assert_eq!(history[1].event, "submit");
}

#[tokio::test]
async fn stale_commit_is_rejected() {
    let pool = memory_pool().await;
    let store = SqliteInstanceStore::new(pool);
    store.init_schema().await.unwrap();

    let definition = approval_workflow();
    let original = store
        .create_instance(&definition, "exp-2", json!({}), None)
        .await
        .unwrap();

    let entry = |to: &str, event: &str| HistoryEntry {
        sequence: 0,
        from_state: Some("DRAFT".to_string()),
        to_state: to.to_string(),
        event: event.to_string(),
        actor_id: None,
        timestamp: Utc::now(),
        context: json!({}),
    };

    let committed = store
        .commit_transition(&original, "SUBMITTED", entry("SUBMITTED", "submit"))
        .await
        .unwrap();
    assert_eq!(committed.version, 2);

    // A second writer still holding version 1
    let err = store
        .commit_transition(&original, "APPROVED", entry("APPROVED", "approve"))
        .await
        .unwrap_err();
    assert!(matches!(err, AutomationError::ConcurrentModification { expected: 1, .. }));

    let history = store.get_history("approval", "exp-2").await.unwrap().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(
        store.get_instance("approval", "exp-2").await.unwrap().unwrap().current_state,
        "SUBMITTED"
    );
}

#[tokio::test]
async fn duplicate_instance_is_rejected_by_the_database() {
    let pool = memory_pool().await;
    let store = SqliteInstanceStore::new(pool);
    store.init_schema().await.unwrap();

    let definition = approval_workflow();
    store.create_instance(&definition, "exp-3", json!({}), None).await.unwrap();

    let err = store
        .create_instance(&definition, "exp-3", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AutomationError::AlreadyExists(_)));
    assert!(store.get_history("approval", "missing").await.unwrap().is_none());
}

#[tokio::test]
async fn removed_rules_stay_removed() {
    let pool = memory_pool().await;

    let engine = AutomationEngine::with_sqlite(pool.clone(), EngineConfig::default())
        .await
        .unwrap();
    engine.init().await.unwrap();
    engine
        .create_rule(Rule::new("temp", "x").with_action(Action::log("info", "x")))
        .await
        .unwrap();
    assert!(engine.rules().remove_rule("temp").await.unwrap());

    let restarted = AutomationEngine::with_sqlite(pool, EngineConfig::default())
        .await
        .unwrap();
    restarted.init().await.unwrap();
    assert!(restarted.rules().list_rules().is_empty());
}

#[tokio::test]
async fn undecodable_rows_are_skipped_on_boot() {
    let pool = memory_pool().await;

    let engine = AutomationEngine::with_sqlite(pool.clone(), EngineConfig::default())
        .await
        .unwrap();
    engine.init().await.unwrap();
    engine.define_workflow(approval_workflow()).await.unwrap();
    engine
        .create_rule(Rule::new("keeper", "expense.filed").with_action(Action::log("info", "filed")))
        .await
        .unwrap();

    sqlx::query(
        "INSERT INTO workflow_definitions (name, entity_type, definition) \
         VALUES ('broken', 'expense', '{\"name\": \"broken\"}')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO automation_rules (name, trigger_event, priority, enabled, definition) \
         VALUES ('garbled', 'expense.filed', 0, 1, 'not json')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let restarted = AutomationEngine::with_sqlite(pool, EngineConfig::default())
        .await
        .unwrap();
    restarted.init().await.unwrap();

    assert!(restarted.lookup_workflow("approval").is_ok());
    assert!(restarted.lookup_workflow("broken").is_err());
    let names: Vec<String> = restarted.rules().list_rules().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["keeper".to_string()]);
}
