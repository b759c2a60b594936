//! Shared container of entity snapshots.

use crate::error::{CoreError, CoreResult};
use crate::record::{Record, TempId};
use crate::state::{EntityAction, EntityState, InsertPosition};
use entcache_protocol::{record_key, ResourceError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// The entity cache shared by every binding of an engine.
///
/// Holds one [`EntityState`] snapshot per entity name, created lazily on first
/// access. Writes clone the current snapshot, apply the actions and swap the
/// result in under the write lock, so readers holding an `Arc<EntityState>`
/// always see a complete transition.
///
/// The store is an ordinary value: construct one per engine (or per test) and
/// share it by `Arc`.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: RwLock<HashMap<String, Arc<EntityState>>>,
    revision: AtomicU64,
}

impl EntityStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot of `entity`, creating it if needed.
    pub fn snapshot(&self, entity: &str) -> Arc<EntityState> {
        if let Some(state) = self.entities.read().get(entity) {
            return Arc::clone(state);
        }
        Arc::clone(self.entities.write().entry(entity.to_string()).or_default())
    }

    /// Applies one action to `entity`.
    pub fn dispatch(&self, entity: &str, action: EntityAction) {
        self.dispatch_batch(entity, [action]);
    }

    /// Applies several actions to `entity` as one transition.
    pub fn dispatch_batch(&self, entity: &str, actions: impl IntoIterator<Item = EntityAction>) {
        let mut entities = self.entities.write();
        let current = entities.entry(entity.to_string()).or_default();

        let mut next = (**current).clone();
        let mut applied = 0usize;
        for action in actions {
            next.apply(action);
            applied += 1;
        }
        *current = Arc::new(next);

        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(entity, applied, revision, "entity state replaced");
    }

    /// Returns a counter incremented by every transition.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Returns the names of every entity accessed so far.
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stores a record under `key`.
    pub fn set_data(&self, entity: &str, key: impl Into<String>, record: Record) {
        self.dispatch(
            entity,
            EntityAction::SetData {
                key: key.into(),
                record,
            },
        );
    }

    /// Stores a list under `key`.
    pub fn set_list(&self, entity: &str, key: impl Into<String>, records: Vec<Record>) {
        self.dispatch(
            entity,
            EntityAction::SetList {
                key: key.into(),
                records,
            },
        );
    }

    /// Sets the loading flag of `key`.
    pub fn set_loading(&self, entity: &str, key: impl Into<String>, loading: bool) {
        self.dispatch(
            entity,
            EntityAction::SetLoading {
                key: key.into(),
                loading,
            },
        );
    }

    /// Sets or clears the error of `key`.
    pub fn set_error(&self, entity: &str, key: impl Into<String>, error: Option<ResourceError>) {
        self.dispatch(
            entity,
            EntityAction::SetError {
                key: key.into(),
                error,
            },
        );
    }

    /// Empties the cache of `entity`.
    pub fn clear_cache(&self, entity: &str) {
        self.dispatch(entity, EntityAction::ClearCache);
    }

    /// Empties the cache of every entity.
    pub fn clear_all(&self) {
        self.entities.write().clear();
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks every key of `entity` stale while keeping its data.
    pub fn invalidate(&self, entity: &str) {
        self.dispatch(entity, EntityAction::Invalidate);
    }

    /// Writes an optimistic record and appends it to every cached list.
    pub fn optimistic_update(&self, entity: &str, temp_id: TempId, record: Record) {
        self.dispatch(
            entity,
            EntityAction::OptimisticUpdate {
                temp_id,
                record,
                position: InsertPosition::Append,
            },
        );
    }

    /// Removes every trace of an optimistic record.
    pub fn rollback_optimistic(&self, entity: &str, temp_id: TempId) {
        self.dispatch(entity, EntityAction::RollbackOptimistic { temp_id });
    }

    /// Replaces an optimistic record with the confirmed one, keyed by its id.
    pub fn confirm_optimistic(&self, entity: &str, temp_id: TempId, record: Record) -> CoreResult<()> {
        let id = record.id().ok_or_else(|| CoreError::MissingRecordId {
            entity: entity.to_string(),
        })?;
        self.dispatch(
            entity,
            EntityAction::ConfirmOptimistic {
                temp_id,
                key: id.to_string(),
                record,
            },
        );
        Ok(())
    }

    /// Replaces an optimistic record with the confirmed one, keyed as
    /// `<endpoint>/<id>` so by-id reads find it.
    pub fn confirm_optimistic_at(
        &self,
        entity: &str,
        endpoint: &str,
        temp_id: TempId,
        record: Record,
    ) -> CoreResult<()> {
        let id = record.id().ok_or_else(|| CoreError::MissingRecordId {
            entity: entity.to_string(),
        })?;
        self.dispatch(
            entity,
            EntityAction::ConfirmOptimistic {
                temp_id,
                key: record_key(endpoint, &id),
                record,
            },
        );
        Ok(())
    }
}
