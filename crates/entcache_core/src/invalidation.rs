//! Cross-entity invalidation.
//!
//! The invalidation manager is a typed event bus keyed by entity name. Rules
//! describe which related entities go stale when an entity changes;
//! listeners are told when an entity they watch has been invalidated.
//!
//! # Usage
//!
//! ```rust,ignore
//! let manager = InvalidationManager::new();
//! manager.add_rule("posts", ["comments", "feed"], None);
//!
//! let id = manager.subscribe("comments", |event| {
//!     println!("{} invalidated by {}", event.entity, event.source);
//! });
//!
//! // Notifies posts, comments and feed listeners once each.
//! manager.invalidate("posts", None);
//! manager.unsubscribe(id);
//! ```

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Decides from the mutation payload whether related entities are invalidated.
pub type Predicate = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;

/// Callback invoked when a watched entity is invalidated.
pub type Listener = Arc<dyn Fn(&InvalidationEvent) + Send + Sync>;

/// Notification delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidationEvent {
    /// The entity that went stale.
    pub entity: String,
    /// The entity whose invalidation caused this one.
    pub source: String,
    /// Payload of the triggering mutation, if any.
    pub payload: Option<Value>,
}

/// Registration token returned by [`InvalidationManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Which entities go stale together.
#[derive(Clone)]
pub struct InvalidationRule {
    /// The entity the rule belongs to. Always a target of its own rule.
    pub entity: String,
    /// Entities invalidated alongside `entity`.
    pub related: Vec<String>,
    /// Optional gate on the related entities.
    pub predicate: Option<Predicate>,
}

impl InvalidationRule {
    /// Returns the targets of this rule for `payload`.
    ///
    /// When the predicate rejects the payload only the rule's own entity is a
    /// target; related entities are skipped.
    pub fn targets(&self, payload: Option<&Value>) -> Vec<String> {
        let mut targets = vec![self.entity.clone()];
        let accepted = self.predicate.as_ref().map_or(true, |accepts| accepts(payload));
        if accepted {
            for related in &self.related {
                push_unique(&mut targets, related);
            }
        }
        targets
    }
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRule")
            .field("entity", &self.entity)
            .field("related", &self.related)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Rule table and listener registry.
///
/// Listeners are invoked synchronously, after the registry lock is released,
/// so a listener may subscribe or unsubscribe from inside its callback.
pub struct InvalidationManager {
    rules: RwLock<HashMap<String, InvalidationRule>>,
    listeners: RwLock<HashMap<String, Vec<(SubscriptionId, Listener)>>>,
    next_id: AtomicU64,
}

impl InvalidationManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers the rule for `entity`, replacing any previous one.
    pub fn add_rule<I, S>(&self, entity: &str, related: I, predicate: Option<Predicate>)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rule = InvalidationRule {
            entity: entity.to_string(),
            related: related.into_iter().map(Into::into).collect(),
            predicate,
        };
        self.rules.write().insert(entity.to_string(), rule);
    }

    /// Removes the rule for `entity`.
    pub fn remove_rule(&self, entity: &str) -> Option<InvalidationRule> {
        self.rules.write().remove(entity)
    }

    /// Returns the rule for `entity`.
    pub fn rule(&self, entity: &str) -> Option<InvalidationRule> {
        self.rules.read().get(entity).cloned()
    }

    /// Registers a listener for `entity`.
    ///
    /// The same callback may be registered more than once; each registration
    /// gets its own token and is invoked separately.
    pub fn subscribe<F>(&self, entity: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&InvalidationEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .entry(entity.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Removes exactly one registration. Returns false if it was not found.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        listeners.retain(|_, registered| {
            if !removed {
                let before = registered.len();
                registered.retain(|(rid, _)| *rid != id);
                removed = registered.len() != before;
            }
            !registered.is_empty()
        });
        removed
    }

    /// Returns the number of listeners registered for `entity`.
    pub fn subscriber_count(&self, entity: &str) -> usize {
        self.listeners.read().get(entity).map_or(0, Vec::len)
    }

    /// Returns the entities `invalidate(entity, payload)` would notify,
    /// without notifying anyone.
    pub fn invalidation_targets(&self, entity: &str, payload: Option<&Value>) -> Vec<String> {
        let rule = self.rules.read().get(entity).cloned();
        match rule {
            Some(rule) => rule.targets(payload),
            None => vec![entity.to_string()],
        }
    }

    /// Invalidates `entity` and, per its rule, its related entities.
    ///
    /// Every target's listeners are invoked exactly once. Returns the targets.
    pub fn invalidate(&self, entity: &str, payload: Option<&Value>) -> Vec<String> {
        let targets = self.invalidation_targets(entity, payload);
        let sourced: Vec<_> = targets.iter().map(|t| (t.clone(), entity.to_string())).collect();
        self.notify(&sourced, payload);
        targets
    }

    /// Invalidates several entities at once.
    ///
    /// Targets are the union of each entity's targets; an entity reached
    /// through more than one rule is still notified only once.
    pub fn invalidate_many<I, S>(&self, entities: I, payload: Option<&Value>) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sourced: Vec<(String, String)> = Vec::new();
        for entity in entities {
            let entity = entity.as_ref();
            for target in self.invalidation_targets(entity, payload) {
                if !sourced.iter().any(|(t, _)| *t == target) {
                    sourced.push((target, entity.to_string()));
                }
            }
        }
        self.notify(&sourced, payload);
        sourced.into_iter().map(|(target, _)| target).collect()
    }

    /// Notifies listeners of every `(target, source)` pair.
    fn notify(&self, sourced: &[(String, String)], payload: Option<&Value>) {
        for (target, source) in sourced {
            let listeners: Vec<Listener> = self
                .listeners
                .read()
                .get(target)
                .map(|registered| registered.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default();

            debug!(entity = %target, source = %source, listeners = listeners.len(), "invalidating entity");

            let event = InvalidationEvent {
                entity: target.clone(),
                source: source.clone(),
                payload: payload.cloned(),
            };
            for listener in listeners {
                listener(&event);
            }
        }
    }
}

impl Default for InvalidationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InvalidationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationManager")
            .field("rules", &self.rules.read().len())
            .field("topics", &self.listeners.read().len())
            .finish()
    }
}

fn push_unique(targets: &mut Vec<String>, entity: &str) {
    if !targets.iter().any(|t| t == entity) {
        targets.push(entity.to_string());
    }
}
