/// Declarative rule engine
///
/// Rules are indexed by trigger event in a lock-free ArcSwap table, ordered by
/// descending priority. Every rule triggered by an event is considered (fan-out),
/// each one isolated from the others: a failing action is recorded on its own
/// rule and never stops evaluation of the rest.

use crate::config::RuleMatchMode;
use crate::error::{AutomationError, Result};
use crate::events::{DomainEvent, EventBus, EventSubscriber, RULE_EXECUTED_EVENT};
use crate::rules::action::{ActionContext, ActionDispatcher};
use crate::rules::condition::ConditionEvaluator;
use crate::rules::storage::RuleStorage;
use crate::rules::types::{ActionResult, Rule, RuleExecution, RuleStatus};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Rules by name plus a per-trigger index sorted by descending priority
#[derive(Debug, Clone, Default)]
struct RuleTable {
    by_name: HashMap<String, Arc<Rule>>,
    by_trigger: HashMap<String, Vec<Arc<Rule>>>,
}

impl RuleTable {
    fn upsert(&mut self, rule: Arc<Rule>) {
        self.remove(&rule.name);

        let bucket = self.by_trigger.entry(rule.trigger.clone()).or_default();
        bucket.push(Arc::clone(&rule));
        // Stable: equal priorities keep insertion order
        bucket.sort_by(|a, b| b.priority.cmp(&a.priority));

        self.by_name.insert(rule.name.clone(), rule);
    }

    fn remove(&mut self, name: &str) -> Option<Arc<Rule>> {
        let removed = self.by_name.remove(name)?;
        if let Some(bucket) = self.by_trigger.get_mut(&removed.trigger) {
            bucket.retain(|r| r.name != name);
            if bucket.is_empty() {
                self.by_trigger.remove(&removed.trigger);
            }
        }
        Some(removed)
    }

    /// Flip `enabled` without moving the rule within its trigger bucket
    fn set_enabled(&mut self, name: &str, enabled: bool) -> Option<Arc<Rule>> {
        let slot = self.by_name.get_mut(name)?;
        let mut rule = Rule::clone(slot);
        rule.enabled = enabled;
        let rule = Arc::new(rule);
        *slot = Arc::clone(&rule);

        if let Some(entry) = self
            .by_trigger
            .get_mut(&rule.trigger)
            .and_then(|bucket| bucket.iter_mut().find(|r| r.name == name))
        {
            *entry = Arc::clone(&rule);
        }
        Some(rule)
    }
}

/// Matches events against rules and runs their actions
pub struct RuleEngine {
    rules: ArcSwap<RuleTable>,
    evaluator: ConditionEvaluator,
    dispatcher: Arc<ActionDispatcher>,
    bus: Arc<EventBus>,
    storage: Option<RuleStorage>,
    max_cascade_depth: u32,
    match_mode: RuleMatchMode,
}

impl std::fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleEngine")
            .field("rules", &self.rules.load().by_name.len())
            .field("max_cascade_depth", &self.max_cascade_depth)
            .field("match_mode", &self.match_mode)
            .finish()
    }
}

impl RuleEngine {
    pub fn new(
        dispatcher: Arc<ActionDispatcher>,
        bus: Arc<EventBus>,
        max_cascade_depth: u32,
        match_mode: RuleMatchMode,
    ) -> Self {
        Self {
            rules: ArcSwap::new(Arc::new(RuleTable::default())),
            evaluator: ConditionEvaluator::new(),
            dispatcher,
            bus,
            storage: None,
            max_cascade_depth,
            match_mode,
        }
    }

    /// Persist every rule change to `storage`
    pub fn with_storage(mut self, storage: RuleStorage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn dispatcher(&self) -> &Arc<ActionDispatcher> {
        &self.dispatcher
    }

    /// Load stored rules into the table; invalid rows are skipped with an error log
    pub async fn init_from_storage(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let mut table = RuleTable::default();
        for rule in storage.load_all_rules().await? {
            match self.validate(&rule) {
                Ok(()) => table.upsert(Arc::new(rule)),
                Err(e) => tracing::error!("❌ Skipping stored rule '{}': {}", rule.name, e),
            }
        }

        let count = table.by_name.len();
        self.rules.store(Arc::new(table));
        tracing::info!("Initialized rule engine with {} rules", count);

        Ok(())
    }

    /// Validate, index and persist a rule; replaces any rule with the same name
    pub async fn create_rule(&self, rule: Rule) -> Result<Rule> {
        self.validate(&rule)?;

        if let Some(storage) = &self.storage {
            storage.save_rule(&rule).await?;
        }

        let stored = Arc::new(rule.clone());
        self.rules.rcu(|table| {
            let mut next = RuleTable::clone(table);
            next.upsert(Arc::clone(&stored));
            next
        });

        tracing::info!(
            "📜 Rule '{}' registered on '{}' (priority {}, enabled {})",
            rule.name,
            rule.trigger,
            rule.priority,
            rule.enabled
        );

        Ok(rule)
    }

    pub fn get_rule(&self, name: &str) -> Option<Rule> {
        self.rules.load().by_name.get(name).map(|r| Rule::clone(r))
    }

    /// All rules sorted by trigger, then descending priority
    pub fn list_rules(&self) -> Vec<Rule> {
        let table = self.rules.load();
        let mut triggers: Vec<&String> = table.by_trigger.keys().collect();
        triggers.sort();
        triggers
            .into_iter()
            .flat_map(|t| table.by_trigger[t].iter().map(|r| Rule::clone(r)))
            .collect()
    }

    /// Enable or disable a rule in place
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<Rule> {
        let mut updated = None;
        self.rules.rcu(|table| {
            let mut next = RuleTable::clone(table);
            updated = next.set_enabled(name, enabled);
            next
        });
        let rule = updated.ok_or_else(|| AutomationError::NotFound(format!("rule '{}'", name)))?;

        if let Some(storage) = &self.storage {
            storage.save_rule(&rule).await?;
        }

        tracing::info!("🔀 Rule '{}' enabled set to {}", rule.name, rule.enabled);
        Ok(Rule::clone(&rule))
    }

    pub async fn remove_rule(&self, name: &str) -> Result<bool> {
        if let Some(storage) = &self.storage {
            storage.delete_rule(name).await?;
        }

        let previous = self.rules.rcu(|table| {
            let mut next = RuleTable::clone(table);
            next.remove(name);
            next
        });
        Ok(previous.by_name.contains_key(name))
    }

    /// Evaluate every rule triggered by `name` against `payload`
    pub async fn on_event(&self, name: &str, payload: Value) -> Result<Vec<RuleExecution>> {
        let event = DomainEvent::new(name, payload);
        Ok(self.process_event(&event).await)
    }

    /// Evaluate an event that may be part of a cascade
    pub async fn process_event(&self, event: &DomainEvent) -> Vec<RuleExecution> {
        if event.trail.depth > self.max_cascade_depth {
            tracing::warn!(
                "⚠️ Dropping event '{}': cascade depth {} exceeds limit {} (chain: {:?})",
                event.name,
                event.trail.depth,
                self.max_cascade_depth,
                event.trail.rules
            );
            return Vec::new();
        }

        let rules: Vec<Arc<Rule>> = self
            .rules
            .load()
            .by_trigger
            .get(&event.name)
            .cloned()
            .unwrap_or_default();

        if rules.is_empty() {
            return Vec::new();
        }
        tracing::debug!("🎯 Event '{}' triggers {} rules", event.name, rules.len());

        let mut records = Vec::with_capacity(rules.len());
        for rule in rules {
            if event.trail.contains(&rule.name) {
                tracing::warn!(
                    "⚠️ Rule '{}' already fired in this chain, skipping event '{}'",
                    rule.name,
                    event.name
                );
                let record = RuleExecution::skipped(&rule.name, &event.name, RuleStatus::CycleDetected);
                self.notify(&rule, event, &record).await;
                records.push(record);
                continue;
            }

            let record = self.evaluate_rule(&rule, event).await;
            let matched = record.matched;
            self.notify(&rule, event, &record).await;
            records.push(record);

            if matched && self.match_mode == RuleMatchMode::FirstMatch {
                tracing::debug!("First-match mode: stopping after rule '{}'", rule.name);
                break;
            }
        }

        records
    }

    /// Evaluate one rule; action failures are captured on the record
    async fn evaluate_rule(&self, rule: &Rule, event: &DomainEvent) -> RuleExecution {
        if !rule.enabled {
            return RuleExecution::skipped(&rule.name, &event.name, RuleStatus::Disabled);
        }

        let start_time = Instant::now();
        if !self.evaluator.evaluate(&rule.condition, &event.payload) {
            let mut record = RuleExecution::skipped(&rule.name, &event.name, RuleStatus::NotMatched);
            record.duration_ms = start_time.elapsed().as_millis() as u64;
            return record;
        }

        let ctx = ActionContext { rule, event };
        let mut action_results = Vec::with_capacity(rule.actions.len());
        let mut error = None;

        for action in &rule.actions {
            let action_start = Instant::now();
            match self.dispatcher.dispatch(action, &ctx).await {
                Ok(output) => action_results.push(ActionResult {
                    action_type: action.action_type.clone(),
                    success: true,
                    output: Some(output),
                    error: None,
                    duration_ms: action_start.elapsed().as_millis() as u64,
                }),
                Err(e) => {
                    tracing::error!("❌ {}", e);
                    action_results.push(ActionResult {
                        action_type: action.action_type.clone(),
                        success: false,
                        output: None,
                        error: Some(e.to_string()),
                        duration_ms: action_start.elapsed().as_millis() as u64,
                    });
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let status = if error.is_some() {
            RuleStatus::ActionFailed
        } else {
            RuleStatus::Executed
        };
        let duration_ms = start_time.elapsed().as_millis() as u64;

        tracing::info!(
            "⚡ Rule '{}' on '{}': {:?} in {}ms",
            rule.name,
            event.name,
            status,
            duration_ms
        );

        RuleExecution {
            rule: rule.name.clone(),
            event: event.name.clone(),
            status,
            matched: true,
            executed: error.is_none(),
            duration_ms,
            error,
            action_results,
        }
    }

    async fn notify(&self, rule: &Rule, event: &DomainEvent, record: &RuleExecution) {
        let payload = match serde_json::to_value(record) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("❌ Failed to serialize execution record for '{}': {}", rule.name, e);
                return;
            }
        };

        let notification =
            DomainEvent::new(RULE_EXECUTED_EVENT, payload).with_trail(event.trail.child(&rule.name));
        self.bus.publish(notification).await;
    }

    fn validate(&self, rule: &Rule) -> Result<()> {
        let mut problems = Vec::new();

        if rule.name.trim().is_empty() {
            problems.push("rule name must not be empty".to_string());
        }
        if rule.trigger.trim().is_empty() {
            problems.push("rule trigger must not be empty".to_string());
        }
        if rule.actions.is_empty() {
            problems.push("rule must have at least one action".to_string());
        }
        for action in &rule.actions {
            if !self.dispatcher.has_handler(&action.action_type) {
                problems.push(format!("unknown action type '{}'", action.action_type));
            }
        }
        problems.extend(self.evaluator.validate(&rule.condition));

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AutomationError::Validation(format!(
                "rule '{}': {}",
                rule.name,
                problems.join("; ")
            )))
        }
    }
}

#[async_trait]
impl EventSubscriber for RuleEngine {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.process_event(event).await;
        Ok(())
    }
}
