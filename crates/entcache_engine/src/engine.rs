//! The sync engine: the container every binding is created from.

use crate::config::{RefetchBehavior, SyncConfig};
use crate::mutation::{MutationBinding, MutationOptions};
use crate::query::{QueryBinding, QueryOptions, QueryTarget};
use crate::transport::Connector;
use entcache_core::{EntityStore, InvalidationManager, RecordId, RequestLedger};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Counters of engine activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Fetches that reached the connector.
    pub fetches_started: u64,
    /// Fetches skipped because the cached data was fresh.
    pub fetches_skipped_fresh: u64,
    /// Fetches skipped because the key was already being fetched.
    pub fetches_skipped_in_flight: u64,
    /// Responses discarded because a newer request for the key was issued.
    pub responses_superseded: u64,
    /// Mutations the backend accepted.
    pub mutations_succeeded: u64,
    /// Mutations that failed, including validation failures.
    pub mutations_failed: u64,
    /// Optimistic entries rolled back.
    pub rollbacks: u64,
}

struct Shared<C> {
    connector: C,
    store: Arc<EntityStore>,
    invalidation: Arc<InvalidationManager>,
    ledger: RequestLedger,
    stats: RwLock<EngineStats>,
}

/// Owns the connector, the entity store and the invalidation manager, and
/// hands them to the bindings it creates.
///
/// Cloning is cheap; clones share all state. A clone obtained through
/// [`SyncEngine::with_refetch_behavior`] differs only in the defaults it
/// passes to new query bindings.
///
/// # Example
///
/// ```rust,ignore
/// let engine = SyncEngine::new(SyncConfig::default(), connector);
/// let user = engine.record("users", "users", 1);
/// user.fetch().await;
/// ```
pub struct SyncEngine<C: Connector> {
    shared: Arc<Shared<C>>,
    config: SyncConfig,
}

impl<C: Connector> SyncEngine<C> {
    /// Creates an engine with its own store and invalidation manager.
    pub fn new(config: SyncConfig, connector: C) -> Self {
        Self::with_store(
            config,
            connector,
            Arc::new(EntityStore::new()),
            Arc::new(InvalidationManager::new()),
        )
    }

    /// Creates an engine over an existing store and invalidation manager.
    pub fn with_store(
        config: SyncConfig,
        connector: C,
        store: Arc<EntityStore>,
        invalidation: Arc<InvalidationManager>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                store,
                invalidation,
                ledger: RequestLedger::new(),
                stats: RwLock::new(EngineStats::default()),
            }),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns a handle sharing this engine's state whose query bindings
    /// default to `behavior`.
    pub fn with_refetch_behavior(&self, behavior: RefetchBehavior) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            config: self.config.clone().with_refetch_behavior(behavior),
        }
    }

    /// Returns the connector.
    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Returns the entity store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.shared.store
    }

    /// Returns the invalidation manager.
    pub fn invalidation(&self) -> &Arc<InvalidationManager> {
        &self.shared.invalidation
    }

    pub(crate) fn ledger(&self) -> &RequestLedger {
        &self.shared.ledger
    }

    /// Returns a copy of the activity counters.
    pub fn stats(&self) -> EngineStats {
        self.shared.stats.read().clone()
    }

    pub(crate) fn record_stat(&self, update: impl FnOnce(&mut EngineStats)) {
        update(&mut self.shared.stats.write());
    }

    /// Creates a query binding.
    pub fn query(
        &self,
        entity: &str,
        endpoint: &str,
        target: QueryTarget,
        options: QueryOptions,
    ) -> QueryBinding<C> {
        QueryBinding::new(self.clone(), entity, endpoint, target, options)
    }

    /// Creates a binding reading the record `<endpoint>/<id>`.
    pub fn record(&self, entity: &str, endpoint: &str, id: impl Into<RecordId>) -> QueryBinding<C> {
        self.query(entity, endpoint, QueryTarget::record(id), QueryOptions::default())
    }

    /// Creates a binding reading the unparameterized list of `endpoint`.
    pub fn list(&self, entity: &str, endpoint: &str) -> QueryBinding<C> {
        self.query(entity, endpoint, QueryTarget::list(), QueryOptions::default())
    }

    /// Creates a mutation binding.
    pub fn mutation(&self, entity: &str, endpoint: &str, options: MutationOptions) -> MutationBinding<C> {
        MutationBinding::new(self.clone(), entity, endpoint, options)
    }

    /// Invalidates `entity` and, per its rule, its related entities.
    ///
    /// Each target is marked stale in the store before any listener runs.
    /// Returns the targets.
    pub fn invalidate(&self, entity: &str, payload: Option<&Value>) -> Vec<String> {
        self.invalidate_many([entity], payload)
    }

    /// Invalidates several entities, notifying each target once.
    pub fn invalidate_many<I, S>(&self, entities: I, payload: Option<&Value>) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entities: Vec<S> = entities.into_iter().collect();
        let invalidation = self.invalidation();

        let mut targets: Vec<String> = Vec::new();
        for entity in &entities {
            for target in invalidation.invalidation_targets(entity.as_ref(), payload) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        for target in &targets {
            self.store().invalidate(target);
        }
        debug!(targets = ?targets, "invalidation fan-out");

        invalidation.invalidate_many(entities, payload)
    }

    /// Empties the cache of `entity`.
    pub fn clear_cache(&self, entity: &str) {
        self.store().clear_cache(entity);
    }

    /// Empties every cache and abandons every in-flight fetch.
    pub fn clear_all(&self) {
        self.ledger().clear();
        self.store().clear_all();
    }
}

impl<C: Connector> Clone for SyncEngine<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
        }
    }
}

impl<C: Connector> fmt::Debug for SyncEngine<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("entities", &self.store().entities())
            .field("stats", &self.stats())
            .finish()
    }
}
