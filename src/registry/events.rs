use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::model::EventSpec;

/// Deliveries nested deeper than this are refused
pub const MAX_EVENT_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub name: String,
    pub payload: Value,
    pub emitted_at: DateTime<Utc>,
    /// Number of event deliveries this emit happened inside; 0 outside any subscriber
    pub depth: usize,
}

#[async_trait::async_trait]
pub trait EventSubscriber: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event '{0}' is not declared")]
    Unknown(String),

    #[error("event '{name}' emitted {depth} deliveries deep (limit {MAX_EVENT_DEPTH})")]
    TooDeep { name: String, depth: usize },
}

/// Declared events and their in-process subscribers
#[derive(Default)]
pub struct EventRegistry {
    declared: HashMap<String, EventSpec>,
    subscribers: RwLock<HashMap<String, Vec<(SubscriptionId, Arc<dyn EventSubscriber>)>>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, spec: EventSpec) {
        self.declared.insert(spec.name.clone(), spec);
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&EventSpec> {
        self.declared.get(name)
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    pub fn subscribe(
        &self,
        name: &str,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> Result<SubscriptionId, EventError> {
        if !self.is_declared(name) {
            return Err(EventError::Unknown(name.to_string()));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .entry(name.to_string())
            .or_default()
            .push((id, subscriber));
        Ok(id)
    }

    /// Remove a subscription; returns false when it was not registered
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let Some(list) = subscribers.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscribers.read().get(name).map_or(0, Vec::len)
    }

    /// Deliver an event to every subscriber in subscription order.
    ///
    /// Fails only when the event is not declared. Subscriber failures are logged and
    /// do not stop delivery to the remaining subscribers.
    pub async fn emit(&self, name: &str, payload: Value) -> Result<usize, EventError> {
        self.emit_at(name, payload, 0).await
    }

    /// Like [`EventRegistry::emit`] for an emit made while handling another event.
    ///
    /// `depth` counts the deliveries already in progress; at [`MAX_EVENT_DEPTH`] the
    /// event is refused so handlers that re-emit their own event terminate.
    pub async fn emit_at(&self, name: &str, payload: Value, depth: usize) -> Result<usize, EventError> {
        if !self.is_declared(name) {
            return Err(EventError::Unknown(name.to_string()));
        }
        if depth >= MAX_EVENT_DEPTH {
            return Err(EventError::TooDeep {
                name: name.to_string(),
                depth,
            });
        }

        let event = Event {
            name: name.to_string(),
            payload,
            emitted_at: Utc::now(),
            depth,
        };
        let targets: Vec<Arc<dyn EventSubscriber>> = self
            .subscribers
            .read()
            .get(name)
            .map(|list| list.iter().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default();

        for subscriber in &targets {
            if let Err(e) = subscriber.handle(&event).await {
                log::warn!("Subscriber for event '{}' failed: {:#}", name, e);
            }
        }

        log::debug!("Event '{}' delivered to {} subscriber(s)", name, targets.len());
        Ok(targets.len())
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.declared.keys().collect();
        names.sort();
        f.debug_struct("EventRegistry").field("events", &names).finish()
    }
}
