//! In-process event bus
//!
//! Domain events published here reach two audiences:
//! - subscribers (the rule engine) awaited inline, in registration order, so
//!   rule chains complete before `publish` returns
//! - observers holding a broadcast receiver (tests, metrics, websockets)
//!
//! Subscribers are held weakly so the bus never keeps an engine alive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Event published after every rule evaluation
pub const RULE_EXECUTED_EVENT: &str = "automation.rule.executed";

/// Name of the event published when an instance enters `state`
pub fn workflow_event_name(workflow: &str, state: &str) -> String {
    format!("workflow.{}.{}", workflow, state)
}

/// Depth and rules an event chain has passed through
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeTrail {
    /// Hops from the originating event (0 for externally published events)
    pub depth: u32,
    /// Rules that fired along this chain, oldest first
    pub rules: Vec<String>,
}

impl CascadeTrail {
    /// Trail for an event produced by `rule` while handling an event with this trail
    pub fn child(&self, rule: &str) -> Self {
        let mut rules = self.rules.clone();
        if !rules.iter().any(|r| r == rule) {
            rules.push(rule.to_string());
        }
        Self {
            depth: self.depth + 1,
            rules,
        }
    }

    pub fn contains(&self, rule: &str) -> bool {
        self.rules.iter().any(|r| r == rule)
    }
}

/// A named event with a JSON payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: Uuid,
    pub name: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub trail: CascadeTrail,
}

impl DomainEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            occurred_at: Utc::now(),
            trail: CascadeTrail::default(),
        }
    }

    pub fn with_trail(mut self, trail: CascadeTrail) -> Self {
        self.trail = trail;
        self
    }
}

/// Something that reacts to published events inline
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()>;
}

/// Pub/sub glue between the workflow runtime and the rule engine
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
    subscribers: RwLock<Vec<Weak<dyn EventSubscriber>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.sender.receiver_count())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register an inline subscriber
    pub fn subscribe(&self, subscriber: &Arc<dyn EventSubscriber>) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push(Arc::downgrade(subscriber));
        }
    }

    /// Observer stream of every published event
    pub fn observe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Drop all inline subscribers
    pub fn clear_subscribers(&self) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.clear();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .map(|s| s.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Publish an event to observers, then await every live subscriber
    ///
    /// Subscriber failures are logged and do not stop delivery to the others.
    pub async fn publish(&self, event: DomainEvent) {
        tracing::debug!("📣 Publishing event '{}' (depth {})", event.name, event.trail.depth);

        // Ignore send errors when nobody is observing
        let _ = self.sender.send(event.clone());

        let live: Vec<Arc<dyn EventSubscriber>> = match self.subscribers.write() {
            Ok(mut subscribers) => {
                subscribers.retain(|w| w.strong_count() > 0);
                subscribers.iter().filter_map(Weak::upgrade).collect()
            }
            Err(_) => Vec::new(),
        };

        for subscriber in live {
            if let Err(e) = subscriber.handle(&event).await {
                tracing::error!("❌ Subscriber failed on event '{}': {}", event.name, e);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
            self.seen.lock().unwrap().push(event.name.clone());
            Ok(())
        }
    }

    #[test]
    fn test_trail_child() {
        let root = CascadeTrail::default();
        let child = root.child("r1");
        let grandchild = child.child("r1");

        assert_eq!(child.depth, 1);
        assert!(child.contains("r1"));
        assert_eq!(grandchild.depth, 2);
        assert_eq!(grandchild.rules, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers_and_observers() {
        let bus = EventBus::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let subscriber: Arc<dyn EventSubscriber> = recorder.clone();
        bus.subscribe(&subscriber);
        let mut observer = bus.observe();

        bus.publish(DomainEvent::new("order.created", json!({"total": 10}))).await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["order.created".to_string()]);
        let observed = observer.recv().await.unwrap();
        assert_eq!(observed.payload["total"], json!(10));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let bus = EventBus::new();
        {
            let subscriber: Arc<dyn EventSubscriber> = Arc::new(Recorder {
                seen: Mutex::new(Vec::new()),
            });
            bus.subscribe(&subscriber);
            assert_eq!(bus.subscriber_count(), 1);
        }

        bus.publish(DomainEvent::new("noop", Value::Null)).await;
        assert_eq!(bus.subscriber_count(), 0);
    }
}
