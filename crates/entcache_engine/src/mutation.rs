//! Mutation bindings: create, update, patch and delete.
//!
//! A successful mutation updates its own entity's cache according to the
//! binding's [`CacheStrategy`] and then broadcasts invalidation to related
//! entities. A failed mutation rolls back its optimistic entry, if any, and
//! reports the error as data.

use crate::config::CacheStrategy;
use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::resource::{Resource, ResourceData, ResourceState};
use crate::transport::{Connector, Method};
use async_trait::async_trait;
use entcache_core::{EntityAction, InsertPosition, Record, RecordId, TempId};
use entcache_protocol::{record_key, Envelope, FieldErrors, ResourceError};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Checks mutation input before it is sent.
pub trait Validator: Send + Sync {
    /// Returns per-field messages if `data` is rejected.
    fn validate(&self, data: &Value) -> Result<(), FieldErrors>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), FieldErrors> + Send + Sync,
{
    fn validate(&self, data: &Value) -> Result<(), FieldErrors> {
        self(data)
    }
}

/// Options of a mutation binding.
#[derive(Clone, Default)]
pub struct MutationOptions {
    /// Write created records to the cache before the backend confirms them.
    pub optimistic: bool,
    /// Placement of created records in cached lists. Defaults to the engine's.
    pub insert_position: Option<InsertPosition>,
    /// Own-entity cache strategy. Defaults to the engine's.
    pub cache_strategy: Option<CacheStrategy>,
    /// Entities invalidated after every successful mutation.
    pub invalidate_related: Vec<String>,
    /// Input check for create and update.
    pub validator: Option<Arc<dyn Validator>>,
}

impl MutationOptions {
    /// Creates options that inherit everything from the engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables optimistic creates.
    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    /// Sets where created records are placed in cached lists.
    pub fn with_insert_position(mut self, position: InsertPosition) -> Self {
        self.insert_position = Some(position);
        self
    }

    /// Sets the own-entity cache strategy.
    pub fn with_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = Some(strategy);
        self
    }

    /// Sets the entities invalidated after every successful mutation.
    pub fn with_invalidate_related<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidate_related = entities.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the input check.
    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }
}

impl fmt::Debug for MutationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationOptions")
            .field("optimistic", &self.optimistic)
            .field("insert_position", &self.insert_position)
            .field("cache_strategy", &self.cache_strategy)
            .field("invalidate_related", &self.invalidate_related)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

/// A mutation addressed by method.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    /// Request method.
    pub method: Method,
    /// Target record. Required for PUT, PATCH and DELETE.
    pub id: Option<RecordId>,
    /// Request body.
    pub data: Option<Value>,
}

impl MutationRequest {
    /// Creates a request.
    pub fn new(method: Method, id: Option<RecordId>, data: Option<Value>) -> Self {
        Self { method, id, data }
    }

    /// A create request.
    pub fn create(data: Value) -> Self {
        Self::new(Method::Post, None, Some(data))
    }

    /// A full update of record `id`.
    pub fn update(id: impl Into<RecordId>, data: Value) -> Self {
        Self::new(Method::Put, Some(id.into()), Some(data))
    }

    /// A partial update of record `id`.
    pub fn patch(id: impl Into<RecordId>, data: Value) -> Self {
        Self::new(Method::Patch, Some(id.into()), Some(data))
    }

    /// A delete of record `id`.
    pub fn delete(id: impl Into<RecordId>) -> Self {
        Self::new(Method::Delete, Some(id.into()), None)
    }
}

/// Result of one mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationOutcome {
    /// The record as confirmed by the backend. `None` for deletes and failures.
    pub record: Option<Record>,
    /// The failure, if the mutation failed.
    pub error: Option<ResourceError>,
    /// Entities invalidated by the mutation.
    pub invalidated: Vec<String>,
}

impl MutationOutcome {
    /// Returns true if the backend accepted the mutation.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// State reported by a mutation binding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationState {
    /// Whether a mutation is in progress.
    pub loading: bool,
    /// The error of the last mutation.
    pub error: Option<ResourceError>,
    /// The record returned by the last successful mutation.
    pub data: Option<Record>,
}

/// Writes to one entity through the engine's connector.
pub struct MutationBinding<C: Connector> {
    engine: SyncEngine<C>,
    entity: String,
    endpoint: String,
    insert_position: InsertPosition,
    cache_strategy: CacheStrategy,
    options: MutationOptions,
    state: RwLock<MutationState>,
}

impl<C: Connector> MutationBinding<C> {
    pub(crate) fn new(engine: SyncEngine<C>, entity: &str, endpoint: &str, options: MutationOptions) -> Self {
        Self {
            insert_position: options
                .insert_position
                .unwrap_or(engine.config().insert_position),
            cache_strategy: options
                .cache_strategy
                .unwrap_or(engine.config().cache_strategy),
            engine,
            entity: entity.to_string(),
            endpoint: endpoint.to_string(),
            options,
            state: RwLock::new(MutationState::default()),
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

    /// Returns the cache strategy in effect.
    pub fn cache_strategy(&self) -> CacheStrategy {
        self.cache_strategy
    }

    /// Returns the binding's state.
    pub fn state(&self) -> MutationState {
        self.state.read().clone()
    }

    /// Clears the binding's state.
    pub fn reset(&self) {
        *self.state.write() = MutationState::default();
    }

    /// Runs the mutation described by `request`.
    ///
    /// Returns `Err` only for requests that can never succeed: GET, or a
    /// record-addressed method without an id. Backend failures are reported
    /// in the outcome.
    pub async fn execute(&self, request: MutationRequest) -> EngineResult<MutationOutcome> {
        let MutationRequest { method, id, data } = request;
        match method {
            Method::Get => Err(EngineError::UnsupportedMethod(method)),
            Method::Post => Ok(self.create(body(data)).await),
            Method::Put | Method::Patch | Method::Delete => {
                let id = id.ok_or(EngineError::MissingId(method))?;
                Ok(match method {
                    Method::Put => self.update(id, body(data)).await,
                    Method::Patch => self.patch(id, body(data)).await,
                    _ => self.remove(id, data).await,
                })
            }
        }
    }

    /// Creates a record.
    pub async fn create(&self, data: Value) -> MutationOutcome {
        if let Err(outcome) = self.validate(&data) {
            return outcome;
        }
        let mut pending = self.begin(Method::Post);

        let temp_id = self.options.optimistic.then(TempId::new);
        if let Some(temp_id) = temp_id {
            self.engine.store().dispatch(
                &self.entity,
                EntityAction::OptimisticUpdate {
                    temp_id,
                    record: Record::new(data.clone()),
                    position: self.insert_position,
                },
            );
        }
        pending.temp_id = temp_id;

        let result = self
            .engine
            .connector()
            .post(&self.endpoint, &data)
            .await
            .map_err(ResourceError::from)
            .and_then(Envelope::into_result);
        pending.settle();

        match result {
            Ok(success) => {
                let record = Record::new(or_request(success.data, data));
                self.apply_created(temp_id, &record);
                let invalidated = self.broadcast(record.value());
                self.succeed(Some(record), invalidated)
            }
            Err(error) => {
                if let Some(temp_id) = temp_id {
                    self.rollback(temp_id);
                }
                self.fail(error)
            }
        }
    }

    /// Replaces record `id`.
    pub async fn update(&self, id: impl Into<RecordId>, data: Value) -> MutationOutcome {
        let id = id.into();
        if let Err(outcome) = self.validate(&data) {
            return outcome;
        }
        let mut pending = self.begin(Method::Put);

        let key = record_key(&self.endpoint, &id);
        let result = self
            .engine
            .connector()
            .put(&key, &data)
            .await
            .map_err(ResourceError::from)
            .and_then(Envelope::into_result);
        pending.settle();

        match result {
            Ok(success) => {
                let record = Record::new(or_request(success.data, data));
                if self.cache_strategy == CacheStrategy::DirectPatch {
                    let in_lists = if record.has_id(&id) {
                        EntityAction::ReplaceInLists {
                            record: record.clone(),
                        }
                    } else {
                        EntityAction::MergeInLists {
                            id,
                            fields: record.value().clone(),
                        }
                    };
                    self.engine.store().dispatch_batch(
                        &self.entity,
                        [
                            EntityAction::SetData {
                                key,
                                record: record.clone(),
                            },
                            in_lists,
                        ],
                    );
                }
                let invalidated = self.broadcast(record.value());
                self.succeed(Some(record), invalidated)
            }
            Err(error) => self.fail(error),
        }
    }

    /// Merges `data` into record `id`.
    pub async fn patch(&self, id: impl Into<RecordId>, data: Value) -> MutationOutcome {
        let id = id.into();
        let mut pending = self.begin(Method::Patch);

        let key = record_key(&self.endpoint, &id);
        let result = self
            .engine
            .connector()
            .patch(&key, &data)
            .await
            .map_err(ResourceError::from)
            .and_then(Envelope::into_result);
        pending.settle();

        match result {
            Ok(success) => {
                let fields = if success.data.is_object() { success.data } else { data };
                let store = self.engine.store();
                if self.cache_strategy == CacheStrategy::DirectPatch {
                    store.dispatch_batch(
                        &self.entity,
                        [
                            EntityAction::MergeData {
                                key: key.clone(),
                                fields: fields.clone(),
                            },
                            EntityAction::MergeInLists {
                                id,
                                fields: fields.clone(),
                            },
                        ],
                    );
                }
                let record = store
                    .snapshot(&self.entity)
                    .data(&key)
                    .cloned()
                    .unwrap_or_else(|| Record::new(fields));
                let invalidated = self.broadcast(record.value());
                self.succeed(Some(record), invalidated)
            }
            Err(error) => self.fail(error),
        }
    }

    /// Deletes record `id`.
    pub async fn delete(&self, id: impl Into<RecordId>) -> MutationOutcome {
        self.remove(id.into(), None).await
    }

    async fn remove(&self, id: RecordId, data: Option<Value>) -> MutationOutcome {
        let mut pending = self.begin(Method::Delete);

        let key = record_key(&self.endpoint, &id);
        let result = self
            .engine
            .connector()
            .delete(&key, data.as_ref())
            .await
            .map_err(ResourceError::from)
            .and_then(Envelope::into_result);
        pending.settle();

        match result {
            Ok(_) => {
                let payload = data.unwrap_or_else(|| json!({ "id": id.as_str() }));
                if self.cache_strategy == CacheStrategy::DirectPatch {
                    self.engine.store().dispatch_batch(
                        &self.entity,
                        [
                            EntityAction::RemoveData { key },
                            EntityAction::RemoveFromLists { id },
                        ],
                    );
                }
                let invalidated = self.broadcast(&payload);
                self.succeed(None, invalidated)
            }
            Err(error) => self.fail(error),
        }
    }

    fn validate(&self, data: &Value) -> Result<(), MutationOutcome> {
        let Some(validator) = &self.options.validator else {
            return Ok(());
        };
        validator.validate(data).map_err(|fields| {
            debug!(entity = %self.entity, fields = fields.len(), "mutation input rejected");
            self.fail(ResourceError::validation(fields))
        })
    }

    fn begin(&self, method: Method) -> PendingMutation<'_, C> {
        debug!(entity = %self.entity, %method, "dispatching mutation");
        let mut state = self.state.write();
        state.loading = true;
        state.error = None;
        PendingMutation {
            binding: self,
            temp_id: None,
            armed: true,
        }
    }

    /// Writes the created record into the cache.
    fn apply_created(&self, temp_id: Option<TempId>, record: &Record) {
        let key = record.id().map(|id| record_key(&self.endpoint, &id));
        let direct = self.cache_strategy == CacheStrategy::DirectPatch;

        let mut actions = Vec::new();
        match temp_id {
            Some(temp_id) => match key {
                Some(key) => {
                    actions.push(EntityAction::ConfirmOptimistic {
                        temp_id,
                        key: key.clone(),
                        record: record.clone(),
                    });
                    actions.push(EntityAction::SetData {
                        key,
                        record: record.clone(),
                    });
                    // Lists refetched while the request was in flight lost
                    // the optimistic copy. Confirmed lists are replaced in place.
                    if direct {
                        actions.push(EntityAction::InsertIntoLists {
                            record: record.clone(),
                            position: self.insert_position,
                        });
                    }
                }
                // Without an id the record cannot be keyed; drop the
                // optimistic entry and keep only list copies.
                None => {
                    actions.push(EntityAction::RollbackOptimistic { temp_id });
                    if direct {
                        actions.push(EntityAction::InsertIntoLists {
                            record: record.clone(),
                            position: self.insert_position,
                        });
                    }
                }
            },
            None if direct => {
                actions.push(EntityAction::InsertIntoLists {
                    record: record.clone(),
                    position: self.insert_position,
                });
                if let Some(key) = key {
                    actions.push(EntityAction::SetData {
                        key,
                        record: record.clone(),
                    });
                }
            }
            None => {}
        }
        if !actions.is_empty() {
            self.engine.store().dispatch_batch(&self.entity, actions);
        }
    }

    fn rollback(&self, temp_id: TempId) {
        debug!(entity = %self.entity, %temp_id, "rolling back optimistic entry");
        self.engine.store().rollback_optimistic(&self.entity, temp_id);
        self.engine.record_stat(|s| s.rollbacks += 1);
    }

    /// Invalidates the rule targets and the configured related entities.
    ///
    /// Under [`CacheStrategy::DirectPatch`] the entity itself is already up to
    /// date and is left out.
    fn broadcast(&self, payload: &Value) -> Vec<String> {
        let mut entities = self
            .engine
            .invalidation()
            .invalidation_targets(&self.entity, Some(payload));
        if self.cache_strategy == CacheStrategy::DirectPatch {
            entities.retain(|entity| *entity != self.entity);
        }
        for related in &self.options.invalidate_related {
            if !entities.contains(related) {
                entities.push(related.clone());
            }
        }
        if entities.is_empty() {
            return Vec::new();
        }
        self.engine.invalidate_many(entities, Some(payload))
    }

    fn succeed(&self, record: Option<Record>, invalidated: Vec<String>) -> MutationOutcome {
        self.engine.record_stat(|s| s.mutations_succeeded += 1);
        *self.state.write() = MutationState {
            loading: false,
            error: None,
            data: record.clone(),
        };
        MutationOutcome {
            record,
            error: None,
            invalidated,
        }
    }

    fn fail(&self, error: ResourceError) -> MutationOutcome {
        warn!(entity = %self.entity, code = %error.code, message = %error.message, "mutation failed");
        self.engine.record_stat(|s| s.mutations_failed += 1);
        {
            let mut state = self.state.write();
            state.loading = false;
            state.error = Some(error.clone());
        }
        MutationOutcome {
            record: None,
            error: Some(error),
            invalidated: Vec::new(),
        }
    }
}

/// A dispatched mutation whose response has not arrived.
///
/// Dropping it unsettled means the mutation future was cancelled: its
/// optimistic entry, if any, is rolled back and the binding stops loading.
struct PendingMutation<'a, C: Connector> {
    binding: &'a MutationBinding<C>,
    temp_id: Option<TempId>,
    armed: bool,
}

impl<C: Connector> PendingMutation<'_, C> {
    /// Marks the response as received.
    fn settle(&mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for PendingMutation<'_, C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(entity = %self.binding.entity, "mutation cancelled");
        if let Some(temp_id) = self.temp_id {
            self.binding.rollback(temp_id);
        }
        self.binding.state.write().loading = false;
    }
}

fn body(data: Option<Value>) -> Value {
    data.unwrap_or_else(|| Value::Object(Map::new()))
}

/// Returns the response data, or the request data when the response has none.
fn or_request(response: Value, request: Value) -> Value {
    if response.is_null() {
        request
    } else {
        response
    }
}

impl<C: Connector> fmt::Debug for MutationBinding<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationBinding")
            .field("entity", &self.entity)
            .field("endpoint", &self.endpoint)
            .field("cache_strategy", &self.cache_strategy)
            .field("options", &self.options)
            .finish()
    }
}

#[async_trait]
impl<C: Connector + 'static> Resource for MutationBinding<C> {
    fn state(&self) -> ResourceState {
        let state = MutationBinding::state(self);
        ResourceState {
            data: state.data.map(ResourceData::Record),
            loading: state.loading,
            error: state.error,
            is_previous: false,
        }
    }

    async fn refetch(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::error::ConnectorError;
    use crate::transport::MockConnector;
    use entcache_core::EntityState;
    use entcache_protocol::ErrorCode;
    use parking_lot::Mutex;

    fn engine() -> SyncEngine<MockConnector> {
        SyncEngine::new(SyncConfig::default(), MockConnector::new())
    }

    fn seed_posts(engine: &SyncEngine<MockConnector>) {
        engine.store().set_list(
            "posts",
            "list:posts",
            vec![Record::new(json!({"id": 1, "title": "first"}))],
        );
        engine.store().set_list("posts", "list:posts:{\"page\":2}", vec![]);
    }

    fn temp_entries(state: &EntityState) -> usize {
        state.records().filter(|(_, r)| r.is_optimistic()).count()
            + state
                .lists()
                .flat_map(|(_, list)| list.iter())
                .filter(|r| r.is_optimistic())
                .count()
    }

    fn listen(engine: &SyncEngine<MockConnector>, entity: &str) -> Arc<Mutex<usize>> {
        let count = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&count);
        engine.invalidation().subscribe(entity, move |_| *sink.lock() += 1);
        count
    }

    #[tokio::test]
    async fn caller_errors_fail_immediately() {
        let engine = engine();
        let binding = engine.mutation("posts", "posts", MutationOptions::new());

        let err = binding
            .execute(MutationRequest::new(Method::Get, None, None))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::UnsupportedMethod(Method::Get));

        let err = binding
            .execute(MutationRequest::new(Method::Delete, None, None))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::MissingId(Method::Delete));
        assert_eq!(engine.connector().total_calls(), 0);
    }

    #[tokio::test]
    async fn validation_failure_never_reaches_connector() {
        let engine = engine();
        let options = MutationOptions::new().with_validator(|data: &Value| {
            if data.get("title").is_some() {
                Ok(())
            } else {
                Err(FieldErrors::from([("title".to_string(), "required".to_string())]))
            }
        });
        let binding = engine.mutation("posts", "posts", options);

        let outcome = binding.create(json!({"body": "x"})).await;
        let error = outcome.error.unwrap();
        assert_eq!(error.code, ErrorCode::Validation);
        assert_eq!(
            error.validation.and_then(|v| v.get("title").cloned()),
            Some("required".to_string())
        );
        assert_eq!(engine.connector().total_calls(), 0);
        assert!(binding.state().error.is_some());
        assert_eq!(engine.stats().mutations_failed, 1);
    }

    #[tokio::test]
    async fn optimistic_create_is_confirmed() {
        let engine = engine();
        seed_posts(&engine);
        engine.connector().respond(
            Method::Post,
            "posts",
            Ok(Envelope::ok(json!({"id": 2, "title": "draft"}))),
        );
        engine.connector().hold();

        let binding = Arc::new(engine.mutation(
            "posts",
            "posts",
            MutationOptions::new().with_optimistic(true),
        ));
        let task = {
            let binding = Arc::clone(&binding);
            tokio::spawn(async move { binding.create(json!({"title": "draft"})).await })
        };
        while engine.connector().total_calls() == 0 {
            tokio::task::yield_now().await;
        }

        // One optimistic entry in data plus one copy per list.
        assert_eq!(temp_entries(&engine.store().snapshot("posts")), 3);
        assert!(binding.state().loading);

        engine.connector().release();
        let outcome = task.await.unwrap();
        assert!(outcome.is_success());

        let state = engine.store().snapshot("posts");
        assert_eq!(temp_entries(&state), 0);
        assert!(state.data("posts/2").is_some());
        let id = RecordId::from(2);
        for (_, list) in state.lists() {
            assert_eq!(list.iter().filter(|r| r.has_id(&id)).count(), 1);
        }
    }

    #[tokio::test]
    async fn list_refetched_during_create_receives_the_record() {
        let engine = engine();
        seed_posts(&engine);
        engine.connector().respond(
            Method::Post,
            "posts",
            Ok(Envelope::ok(json!({"id": 2, "title": "draft"}))),
        );
        engine.connector().hold();

        let binding = Arc::new(engine.mutation(
            "posts",
            "posts",
            MutationOptions::new().with_optimistic(true),
        ));
        let task = {
            let binding = Arc::clone(&binding);
            tokio::spawn(async move { binding.create(json!({"title": "draft"})).await })
        };
        while engine.connector().total_calls() == 0 {
            tokio::task::yield_now().await;
        }

        // A refetch lands without the optimistic copy.
        engine.store().set_list(
            "posts",
            "list:posts",
            vec![Record::new(json!({"id": 1, "title": "first"}))],
        );
        engine.connector().release();
        assert!(task.await.unwrap().is_success());

        let state = engine.store().snapshot("posts");
        let ids: Vec<_> = state
            .list("list:posts")
            .unwrap()
            .iter()
            .filter_map(Record::id)
            .collect();
        assert_eq!(ids, vec![RecordId::from(1), RecordId::from(2)]);
        let id = RecordId::from(2);
        for (_, list) in state.lists() {
            assert_eq!(list.iter().filter(|r| r.has_id(&id)).count(), 1);
        }
    }

    #[tokio::test]
    async fn cancelled_create_rolls_back() {
        let engine = engine();
        seed_posts(&engine);
        engine
            .connector()
            .respond(Method::Post, "posts", Ok(Envelope::ok(json!({"id": 2}))));
        engine.connector().hold();
        let binding = engine.mutation("posts", "posts", MutationOptions::new().with_optimistic(true));

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            binding.create(json!({"title": "draft"})),
        )
        .await;
        assert!(cancelled.is_err());

        let state = engine.store().snapshot("posts");
        assert_eq!(temp_entries(&state), 0);
        assert_eq!(state.list("list:posts").map(<[Record]>::len), Some(1));
        assert!(!binding.state().loading);
        assert_eq!(engine.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn cancelled_update_stops_loading() {
        let engine = engine();
        engine
            .connector()
            .respond(Method::Put, "posts/1", Ok(Envelope::ok(json!({"id": 1}))));
        engine.connector().hold();
        let binding = engine.mutation("posts", "posts", MutationOptions::new());

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            binding.update(1, json!({"id": 1})),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!binding.state().loading);
        assert_eq!(engine.stats().rollbacks, 0);
    }

    #[tokio::test]
    async fn failed_create_rolls_back() {
        let engine = engine();
        seed_posts(&engine);
        engine.connector().respond(
            Method::Post,
            "posts",
            Err(ConnectorError::Network("offline".into())),
        );
        let binding = engine.mutation("posts", "posts", MutationOptions::new().with_optimistic(true));

        let outcome = binding.create(json!({"title": "draft"})).await;
        assert_eq!(outcome.error.map(|e| e.code), Some(ErrorCode::Network));

        let state = engine.store().snapshot("posts");
        assert_eq!(temp_entries(&state), 0);
        assert_eq!(state.list("list:posts").map(<[Record]>::len), Some(1));
        assert_eq!(engine.stats().rollbacks, 1);
        assert!(!binding.state().loading);
    }

    #[tokio::test]
    async fn create_prepends_when_configured() {
        let engine = engine();
        seed_posts(&engine);
        engine
            .connector()
            .respond(Method::Post, "posts", Ok(Envelope::ok(json!({"id": 9}))));
        let binding = engine.mutation(
            "posts",
            "posts",
            MutationOptions::new().with_insert_position(InsertPosition::Prepend),
        );

        binding.create(json!({})).await;
        let state = engine.store().snapshot("posts");
        let list = state.list("list:posts").unwrap();
        assert_eq!(list[0].id(), Some(RecordId::from(9)));
        assert_eq!(list.len(), 2);
        assert!(state.data("posts/9").is_some());
    }

    #[tokio::test]
    async fn update_replaces_record_and_list_items() {
        let engine = engine();
        seed_posts(&engine);
        engine
            .store()
            .set_data("posts", "posts/1", Record::new(json!({"id": 1, "title": "first", "tag": "a"})));
        engine.connector().respond(
            Method::Put,
            "posts/1",
            Ok(Envelope::ok(json!({"id": 1, "title": "renamed"}))),
        );
        let binding = engine.mutation("posts", "posts", MutationOptions::new());

        let outcome = binding.update(1, json!({"title": "renamed"})).await;
        assert!(outcome.is_success());

        let state = engine.store().snapshot("posts");
        assert_eq!(state.data("posts/1").unwrap().value(), &json!({"id": 1, "title": "renamed"}));
        assert_eq!(
            state.list("list:posts").unwrap()[0].get("title"),
            Some(&json!("renamed"))
        );
    }

    #[tokio::test]
    async fn patch_merges_fields() {
        let engine = engine();
        seed_posts(&engine);
        engine
            .store()
            .set_data("posts", "posts/1", Record::new(json!({"id": 1, "title": "first", "tag": "a"})));
        engine
            .connector()
            .respond(Method::Patch, "posts/1", Ok(Envelope::ok(Value::Null)));
        let binding = engine.mutation("posts", "posts", MutationOptions::new());

        let outcome = binding.patch(1, json!({"tag": "b"})).await;
        assert_eq!(
            outcome.record.map(Record::into_value),
            Some(json!({"id": 1, "title": "first", "tag": "b"}))
        );
        let state = engine.store().snapshot("posts");
        assert_eq!(state.list("list:posts").unwrap()[0].get("tag"), Some(&json!("b")));
    }

    #[tokio::test]
    async fn delete_removes_everywhere() {
        let engine = engine();
        seed_posts(&engine);
        engine
            .store()
            .set_data("posts", "posts/1", Record::new(json!({"id": 1})));
        engine
            .connector()
            .respond(Method::Delete, "posts/1", Ok(Envelope::ok(Value::Null)));
        let binding = engine.mutation("posts", "posts", MutationOptions::new());

        let outcome = binding.execute(MutationRequest::delete(1)).await.unwrap();
        assert!(outcome.is_success());
        assert!(outcome.record.is_none());

        let state = engine.store().snapshot("posts");
        assert!(state.data("posts/1").is_none());
        assert_eq!(state.list("list:posts").map(<[Record]>::len), Some(0));
    }

    #[tokio::test]
    async fn related_entities_are_notified_once() {
        let engine = engine();
        engine.invalidation().add_rule("posts", ["comments"], None);
        engine
            .connector()
            .respond(Method::Post, "posts", Ok(Envelope::ok(json!({"id": 3}))));
        let posts = listen(&engine, "posts");
        let comments = listen(&engine, "comments");

        let binding = engine.mutation(
            "posts",
            "posts",
            MutationOptions::new().with_invalidate_related(["comments"]),
        );
        let outcome = binding.create(json!({"title": "t"})).await;

        assert_eq!(outcome.invalidated, vec!["comments"]);
        assert_eq!(*comments.lock(), 1);
        // Direct patch leaves the entity itself alone.
        assert_eq!(*posts.lock(), 0);
    }

    #[tokio::test]
    async fn invalidate_strategy_notifies_own_entity() {
        let engine = engine();
        seed_posts(&engine);
        engine
            .connector()
            .respond(Method::Post, "posts", Ok(Envelope::ok(json!({"id": 4}))));
        let posts = listen(&engine, "posts");

        let binding = engine.mutation(
            "posts",
            "posts",
            MutationOptions::new().with_cache_strategy(CacheStrategy::Invalidate),
        );
        let outcome = binding.create(json!({})).await;

        assert_eq!(outcome.invalidated, vec!["posts"]);
        assert_eq!(*posts.lock(), 1);
        let state = engine.store().snapshot("posts");
        assert_eq!(state.list("list:posts").map(<[Record]>::len), Some(1));
        assert!(state.last_fetch("list:posts").is_none());
    }

    #[tokio::test]
    async fn binding_is_a_resource() {
        let engine = engine();
        engine
            .connector()
            .respond(Method::Post, "posts", Ok(Envelope::ok(json!({"id": 5}))));
        let binding = engine.mutation("posts", "posts", MutationOptions::new());
        binding.create(json!({})).await;

        let resource: &dyn Resource = &binding;
        resource.refetch().await;
        let state = resource.state();
        assert!(!state.loading);
        assert_eq!(state.record().and_then(Record::id), Some(RecordId::from(5)));
        assert_eq!(engine.connector().total_calls(), 1);
    }
}
