//! Query bindings: cached reads of records, lists and parameterized queries.
//!
//! A binding reads one cache key at a time. Fetches go through the engine's
//! request ledger, so at most one non-forced request per key is in flight and
//! the response of a superseded request is dropped. Fresh data is served from
//! the store without a request.

use crate::config::RefetchBehavior;
use crate::engine::SyncEngine;
use crate::resource::{Resource, ResourceData, ResourceState};
use crate::transport::Connector;
use async_trait::async_trait;
use entcache_core::{EntityAction, EntityState, Record, RecordId, SubscriptionId, Ticket};
use entcache_protocol::{list_key, query_key, record_key, Envelope, Params, ResourceError};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// State reported by a query binding.
pub type QueryState = ResourceState;

/// What a query binding reads.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTarget {
    /// The record `<endpoint>/<id>`, cached as a single record.
    Record {
        /// Record id.
        id: RecordId,
    },
    /// A list, requested from the endpoint with both parameter sets merged.
    List {
        /// Parameters selecting the list (filters, scope).
        list_params: Option<Params>,
        /// Parameters of the request (paging, sorting).
        query_params: Option<Params>,
    },
    /// An arbitrary query, cached as a single record.
    Query {
        /// Request parameters.
        params: Option<Params>,
    },
}

impl QueryTarget {
    /// Targets a record by id.
    pub fn record(id: impl Into<RecordId>) -> Self {
        QueryTarget::Record { id: id.into() }
    }

    /// Targets the unparameterized list.
    pub fn list() -> Self {
        QueryTarget::List {
            list_params: None,
            query_params: None,
        }
    }

    /// Targets a parameterized list.
    pub fn list_with(list_params: Option<Params>, query_params: Option<Params>) -> Self {
        QueryTarget::List {
            list_params,
            query_params,
        }
    }

    /// Targets a query.
    pub fn query(params: Option<Params>) -> Self {
        QueryTarget::Query { params }
    }

    /// Returns true for list targets.
    pub fn is_list(&self) -> bool {
        matches!(self, QueryTarget::List { .. })
    }

    /// Returns the cache key of this target under `endpoint`.
    pub fn key(&self, endpoint: &str) -> String {
        match self {
            QueryTarget::Record { id } => record_key(endpoint, id),
            QueryTarget::List {
                list_params,
                query_params,
            } => list_key(endpoint, list_params.as_ref(), query_params.as_ref()),
            QueryTarget::Query { params } => query_key(endpoint, params.as_ref()),
        }
    }

    /// Returns the endpoint and parameters of the GET request.
    ///
    /// For lists, query parameters override list parameters of the same name.
    pub fn request(&self, endpoint: &str) -> (String, Option<Params>) {
        match self {
            QueryTarget::Record { id } => (record_key(endpoint, id), None),
            QueryTarget::List {
                list_params,
                query_params,
            } => {
                let mut merged = Params::new();
                for params in [list_params, query_params].into_iter().flatten() {
                    merged.extend(params.clone());
                }
                (endpoint.to_string(), (!merged.is_empty()).then_some(merged))
            }
            QueryTarget::Query { params } => (
                endpoint.to_string(),
                params.clone().filter(|params| !params.is_empty()),
            ),
        }
    }

    fn resolve(&self, state: &EntityState, key: &str) -> Option<ResourceData> {
        if self.is_list() {
            state.list(key).map(|records| ResourceData::List(records.to_vec()))
        } else {
            state.data(key).cloned().map(ResourceData::Record)
        }
    }

    fn store_action(&self, key: String, data: Value) -> Result<EntityAction, ResourceError> {
        if !self.is_list() {
            return Ok(EntityAction::SetData {
                key,
                record: Record::new(data),
            });
        }
        let records = match data {
            Value::Array(items) => items.into_iter().map(Record::new).collect(),
            Value::Null => Vec::new(),
            _ => return Err(ResourceError::unknown("expected a list response")),
        };
        Ok(EntityAction::SetList { key, records })
    }
}

/// Per-binding overrides of the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long fetched data stays fresh. Defaults to the engine's.
    pub cache_time: Option<Duration>,
    /// Refetch behavior. Defaults to the engine's.
    pub refetch_behavior: Option<RefetchBehavior>,
    /// Disabled bindings never fetch.
    pub enabled: bool,
}

impl QueryOptions {
    /// Creates options that inherit everything from the engine.
    pub fn new() -> Self {
        Self {
            cache_time: None,
            refetch_behavior: None,
            enabled: true,
        }
    }

    /// Sets the cache time.
    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    /// Sets the refetch behavior.
    pub fn with_refetch_behavior(mut self, behavior: RefetchBehavior) -> Self {
        self.refetch_behavior = Some(behavior);
        self
    }

    /// Enables or disables fetching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// How a fetch attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The response was written to the store.
    Completed,
    /// The request failed; the error was written to the store.
    Failed(ResourceError),
    /// Cached data is fresh; no request was made.
    Fresh,
    /// A request for the key is already in flight; no request was made.
    InFlight,
    /// A newer request for the key was issued; the response was discarded.
    Superseded,
    /// The binding is disabled.
    Disabled,
}

/// A cached read of one key of an entity.
///
/// The binding subscribes to its entity's invalidations on creation and
/// unsubscribes when dropped. An invalidation marks the binding, wakes
/// [`QueryBinding::invalidated`], and makes the next [`QueryBinding::sync`] a
/// forced fetch. [`QueryBinding::watch`] runs that sync on every invalidation.
pub struct QueryBinding<C: Connector> {
    engine: SyncEngine<C>,
    entity: String,
    endpoint: String,
    target: RwLock<QueryTarget>,
    cache_time: Duration,
    refetch_behavior: RefetchBehavior,
    enabled: AtomicBool,
    last_resolved: Mutex<Option<ResourceData>>,
    invalidated: Arc<AtomicBool>,
    wake: Arc<Notify>,
    subscription: SubscriptionId,
}

impl<C: Connector> QueryBinding<C> {
    pub(crate) fn new(
        engine: SyncEngine<C>,
        entity: &str,
        endpoint: &str,
        target: QueryTarget,
        options: QueryOptions,
    ) -> Self {
        let invalidated = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let subscription = {
            let invalidated = Arc::clone(&invalidated);
            let wake = Arc::clone(&wake);
            engine.invalidation().subscribe(entity, move |_| {
                invalidated.store(true, Ordering::SeqCst);
                wake.notify_waiters();
            })
        };

        Self {
            cache_time: options.cache_time.unwrap_or(engine.config().cache_time),
            refetch_behavior: options
                .refetch_behavior
                .unwrap_or(engine.config().refetch_behavior),
            enabled: AtomicBool::new(options.enabled),
            engine,
            entity: entity.to_string(),
            endpoint: endpoint.to_string(),
            target: RwLock::new(target),
            last_resolved: Mutex::new(None),
            invalidated,
            wake,
            subscription,
        }
    }

    /// Returns the entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Returns the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the current target.
    pub fn target(&self) -> QueryTarget {
        self.target.read().clone()
    }

    /// Returns the cache key of the current target.
    pub fn key(&self) -> String {
        self.target.read().key(&self.endpoint)
    }

    /// Returns the refetch behavior in effect.
    pub fn refetch_behavior(&self) -> RefetchBehavior {
        self.refetch_behavior
    }

    /// Returns true if the binding may fetch.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enables or disables fetching.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.wake.notify_waiters();
        }
    }

    /// Points the binding at another target.
    ///
    /// The data of the old key, if any, is remembered so stale-while-revalidate
    /// bindings can keep showing it while the new key loads. Does not fetch.
    pub fn set_target(&self, target: QueryTarget) {
        let mut current = self.target.write();
        if *current == target {
            return;
        }
        let old_key = current.key(&self.endpoint);
        let snapshot = self.engine.store().snapshot(&self.entity);
        if let Some(data) = current.resolve(&snapshot, &old_key) {
            *self.last_resolved.lock() = Some(data);
        }
        trace!(entity = %self.entity, from = %old_key, to = %target.key(&self.endpoint), "query target changed");
        *current = target;
    }

    /// Returns true if the entity was invalidated since the last forced fetch.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Waits until the binding is marked invalidated.
    ///
    /// Returns immediately if it already is.
    pub async fn invalidated(&self) {
        loop {
            let notified = self.wake.notified();
            if self.is_invalidated() {
                return;
            }
            notified.await;
        }
    }

    /// Fetches unless the cached data is fresh or a request is in flight.
    pub async fn fetch(&self) -> FetchOutcome {
        self.run(false).await
    }

    /// Fetches regardless of freshness, superseding any request in flight.
    pub async fn refetch(&self) -> FetchOutcome {
        self.run(true).await
    }

    /// Fetches, forcing the request if the binding was invalidated.
    pub async fn sync(&self) -> FetchOutcome {
        let force = self.is_invalidated();
        self.run(force).await
    }

    async fn run(&self, force: bool) -> FetchOutcome {
        if !self.is_enabled() {
            return FetchOutcome::Disabled;
        }

        let target = self.target();
        let key = target.key(&self.endpoint);
        let store = self.engine.store();

        if !force
            && store
                .snapshot(&self.entity)
                .is_fresh(&key, self.cache_time, Instant::now())
        {
            self.engine.record_stat(|s| s.fetches_skipped_fresh += 1);
            trace!(entity = %self.entity, %key, "cached data is fresh");
            return FetchOutcome::Fresh;
        }

        let Some(ticket) = self.engine.ledger().begin(&key, force) else {
            self.engine.record_stat(|s| s.fetches_skipped_in_flight += 1);
            trace!(entity = %self.entity, %key, "fetch already in flight");
            return FetchOutcome::InFlight;
        };
        let mut pending = PendingFetch {
            engine: &self.engine,
            entity: &self.entity,
            ticket,
            armed: true,
        };
        if force {
            self.invalidated.store(false, Ordering::SeqCst);
        }
        self.engine.record_stat(|s| s.fetches_started += 1);
        debug!(entity = %self.entity, %key, force, generation = pending.ticket.generation(), "fetching");

        store.dispatch_batch(
            &self.entity,
            [
                EntityAction::SetLoading {
                    key: key.clone(),
                    loading: true,
                },
                EntityAction::SetError {
                    key: key.clone(),
                    error: None,
                },
            ],
        );

        let (endpoint, params) = target.request(&self.endpoint);
        let response = self.engine.connector().get(&endpoint, params.as_ref()).await;

        let ticket = pending.disarm();
        if !self.engine.ledger().finish(&ticket) {
            self.engine.record_stat(|s| s.responses_superseded += 1);
            debug!(entity = %self.entity, %key, generation = ticket.generation(), "discarding superseded response");
            return FetchOutcome::Superseded;
        }

        let result = response
            .map_err(ResourceError::from)
            .and_then(Envelope::into_result)
            .and_then(|success| target.store_action(key.clone(), success.data));

        let loaded = EntityAction::SetLoading {
            key: key.clone(),
            loading: false,
        };
        match result {
            Ok(action) => {
                store.dispatch_batch(&self.entity, [action, loaded]);
                FetchOutcome::Completed
            }
            Err(error) => {
                warn!(entity = %self.entity, %key, code = %error.code, message = %error.message, "fetch failed");
                store.dispatch_batch(
                    &self.entity,
                    [
                        EntityAction::SetError {
                            key,
                            error: Some(error.clone()),
                        },
                        loaded,
                    ],
                );
                FetchOutcome::Failed(error)
            }
        }
    }

    /// Returns what the binding currently reports.
    ///
    /// A key with cached data reports it, together with any error of a later
    /// failed fetch. A key that is still pending (no data, no error) reports
    /// `loading` under [`RefetchBehavior::Blocking`]; under
    /// [`RefetchBehavior::StaleWhileRevalidate`] it reports the previous key's
    /// data, not loading, if there is any.
    pub fn state(&self) -> QueryState {
        let target = self.target();
        let key = target.key(&self.endpoint);
        let snapshot = self.engine.store().snapshot(&self.entity);

        let loading = snapshot.is_loading(&key);
        let error = snapshot.error(&key).cloned();

        if let Some(data) = target.resolve(&snapshot, &key) {
            *self.last_resolved.lock() = Some(data.clone());
            return QueryState {
                data: Some(data),
                loading,
                error,
                is_previous: false,
            };
        }

        let pending = error.is_none() && self.is_enabled();
        if pending && self.refetch_behavior == RefetchBehavior::StaleWhileRevalidate {
            if let Some(previous) = self.last_resolved.lock().clone() {
                return QueryState {
                    data: Some(previous),
                    loading: false,
                    error: None,
                    is_previous: true,
                };
            }
        }

        QueryState {
            data: None,
            loading: loading || pending,
            error,
            is_previous: false,
        }
    }
}

/// A started fetch whose response has not been handled yet.
///
/// Dropping it while it still holds the ticket means the fetch future was
/// cancelled at the connector call: the key is released and its loading flag
/// cleared, unless a newer request already owns the key.
struct PendingFetch<'a, C: Connector> {
    engine: &'a SyncEngine<C>,
    entity: &'a str,
    ticket: Ticket,
    armed: bool,
}

impl<C: Connector> PendingFetch<'_, C> {
    /// Hands the ticket back once the response is in.
    fn disarm(&mut self) -> Ticket {
        self.armed = false;
        self.ticket.clone()
    }
}

impl<C: Connector> Drop for PendingFetch<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.engine.ledger().abandon(&self.ticket) {
            debug!(entity = %self.entity, key = %self.ticket.key(), "fetch cancelled");
            self.engine
                .store()
                .set_loading(self.entity, self.ticket.key(), false);
        }
    }
}

impl<C: Connector + 'static> QueryBinding<C> {
    /// Spawns a task that refetches the binding whenever it is invalidated.
    ///
    /// The task holds the binding weakly and ends once it is dropped. Must be
    /// called from within a tokio runtime.
    pub fn watch(self: &Arc<Self>) -> JoinHandle<()> {
        let binding = Arc::downgrade(self);
        let wake = Arc::clone(&self.wake);
        tokio::spawn(async move {
            loop {
                let notified = wake.notified();
                {
                    let Some(binding) = binding.upgrade() else {
                        break;
                    };
                    if binding.is_invalidated() && binding.is_enabled() {
                        trace!(entity = %binding.entity, key = %binding.key(), "refetching invalidated query");
                        binding.sync().await;
                        continue;
                    }
                }
                notified.await;
            }
        })
    }
}

impl<C: Connector> Drop for QueryBinding<C> {
    fn drop(&mut self) {
        self.engine.invalidation().unsubscribe(self.subscription);
        // Lets a watch task observe the drop.
        self.wake.notify_waiters();
    }
}

impl<C: Connector> fmt::Debug for QueryBinding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBinding")
            .field("entity", &self.entity)
            .field("key", &self.key())
            .field("refetch_behavior", &self.refetch_behavior)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[async_trait]
impl<C: Connector + 'static> Resource for QueryBinding<C> {
    fn state(&self) -> ResourceState {
        QueryBinding::state(self)
    }

    async fn refetch(&self) {
        QueryBinding::refetch(self).await;
    }
}
