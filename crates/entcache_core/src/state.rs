//! Per-entity cache state and its reducer.
//!
//! [`EntityState`] is an immutable snapshot. [`EntityState::reduce`] applies
//! one [`EntityAction`] and returns the next snapshot; the previous one is
//! left untouched, so any reader holding it keeps a consistent view.

use crate::record::{Record, RecordId, TempId};
use entcache_protocol::ResourceError;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Where new records are placed in cached lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InsertPosition {
    /// Add at the end of every list.
    #[default]
    Append,
    /// Add at the start of every list.
    Prepend,
}

/// A single transition of an entity's cache.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityAction {
    /// Stores a single record and refreshes the key's fetch time.
    SetData {
        /// Cache key.
        key: String,
        /// The record.
        record: Record,
    },
    /// Stores a list and refreshes the key's fetch time.
    SetList {
        /// Cache key.
        key: String,
        /// The records, in order.
        records: Vec<Record>,
    },
    /// Sets the loading flag of a key.
    SetLoading {
        /// Cache key.
        key: String,
        /// Whether a fetch is in progress.
        loading: bool,
    },
    /// Sets or clears the error of a key.
    SetError {
        /// Cache key.
        key: String,
        /// The error, or `None` to clear it.
        error: Option<ResourceError>,
    },
    /// Empties every map of the entity.
    ClearCache,
    /// Forgets every fetch time so the next read refetches. Cached data stays.
    Invalidate,
    /// Writes an optimistic record under its temporary key and appends a
    /// tagged copy to every cached list.
    OptimisticUpdate {
        /// Temporary identifier of the owning mutation.
        temp_id: TempId,
        /// The speculative record.
        record: Record,
        /// Placement in cached lists.
        position: InsertPosition,
    },
    /// Removes the optimistic record and every list copy tagged `temp_id`.
    RollbackOptimistic {
        /// Temporary identifier of the owning mutation.
        temp_id: TempId,
    },
    /// Replaces the optimistic record with the confirmed one.
    ConfirmOptimistic {
        /// Temporary identifier of the owning mutation.
        temp_id: TempId,
        /// Key the confirmed record is stored under.
        key: String,
        /// The confirmed record.
        record: Record,
    },
    /// Adds a record to every cached list.
    InsertIntoLists {
        /// The record.
        record: Record,
        /// Placement in cached lists.
        position: InsertPosition,
    },
    /// Replaces, by id, the matching item of every cached list.
    ReplaceInLists {
        /// The new version of the record.
        record: Record,
    },
    /// Merges fields into, by id, the matching item of every cached list.
    MergeInLists {
        /// Record id.
        id: RecordId,
        /// Fields to merge.
        fields: Value,
    },
    /// Removes, by id, the matching item from every cached list.
    RemoveFromLists {
        /// Record id.
        id: RecordId,
    },
    /// Merges fields into a cached record, or stores them if none is cached.
    MergeData {
        /// Cache key.
        key: String,
        /// Fields to merge.
        fields: Value,
    },
    /// Removes a cached record.
    RemoveData {
        /// Cache key.
        key: String,
    },
}

/// The cache of a single entity.
#[derive(Debug, Clone, Default)]
pub struct EntityState {
    data: HashMap<String, Record>,
    lists: HashMap<String, Vec<Record>>,
    loading: HashMap<String, bool>,
    errors: HashMap<String, Option<ResourceError>>,
    last_fetch: HashMap<String, Instant>,
}

impl EntityState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state after applying `action`.
    #[must_use]
    pub fn reduce(&self, action: EntityAction) -> EntityState {
        let mut next = self.clone();
        next.apply(action);
        next
    }

    /// Applies `action` in place. Only the store uses this, on a private copy.
    pub(crate) fn apply(&mut self, action: EntityAction) {
        match action {
            EntityAction::SetData { key, record } => {
                self.last_fetch.insert(key.clone(), Instant::now());
                self.data.insert(key, record);
            }
            EntityAction::SetList { key, records } => {
                self.last_fetch.insert(key.clone(), Instant::now());
                self.lists.insert(key, records);
            }
            EntityAction::SetLoading { key, loading } => {
                self.loading.insert(key, loading);
            }
            EntityAction::SetError { key, error } => {
                self.errors.insert(key, error);
            }
            EntityAction::ClearCache => {
                self.data.clear();
                self.lists.clear();
                self.loading.clear();
                self.errors.clear();
                self.last_fetch.clear();
            }
            EntityAction::Invalidate => {
                self.last_fetch.clear();
            }
            EntityAction::OptimisticUpdate {
                temp_id,
                record,
                position,
            } => {
                let record = Record::optimistic(record.into_value(), temp_id);
                for list in self.lists.values_mut() {
                    insert(list, record.clone(), position);
                }
                self.data.insert(temp_id.key(), record);
            }
            EntityAction::RollbackOptimistic { temp_id } => {
                self.data.remove(&temp_id.key());
                for list in self.lists.values_mut() {
                    list.retain(|item| item.temp_id() != Some(temp_id));
                }
            }
            EntityAction::ConfirmOptimistic {
                temp_id,
                key,
                record,
            } => {
                self.data.remove(&temp_id.key());
                for list in self.lists.values_mut() {
                    for item in list.iter_mut() {
                        if item.temp_id() == Some(temp_id) {
                            *item = record.clone();
                        }
                    }
                }
                self.data.insert(key, record);
            }
            EntityAction::InsertIntoLists { record, position } => {
                let id = record.id();
                for list in self.lists.values_mut() {
                    // A list already holding the record (refetched meanwhile) is replaced in place.
                    match id.as_ref().and_then(|id| list.iter().position(|r| r.has_id(id))) {
                        Some(index) => list[index] = record.clone(),
                        None => insert(list, record.clone(), position),
                    }
                }
            }
            EntityAction::ReplaceInLists { record } => {
                if let Some(id) = record.id() {
                    for item in self.lists.values_mut().flatten() {
                        if item.has_id(&id) {
                            *item = record.clone();
                        }
                    }
                }
            }
            EntityAction::MergeInLists { id, fields } => {
                for item in self.lists.values_mut().flatten() {
                    if item.has_id(&id) {
                        item.merge(&fields);
                    }
                }
            }
            EntityAction::RemoveFromLists { id } => {
                for list in self.lists.values_mut() {
                    list.retain(|item| !item.has_id(&id));
                }
            }
            EntityAction::MergeData { key, fields } => match self.data.get_mut(&key) {
                Some(existing) => existing.merge(&fields),
                None => {
                    self.data.insert(key, Record::new(fields));
                }
            },
            EntityAction::RemoveData { key } => {
                self.data.remove(&key);
                self.last_fetch.remove(&key);
            }
        }
    }

    /// Returns the cached record for `key`.
    pub fn data(&self, key: &str) -> Option<&Record> {
        self.data.get(key)
    }

    /// Returns the cached list for `key`.
    pub fn list(&self, key: &str) -> Option<&[Record]> {
        self.lists.get(key).map(Vec::as_slice)
    }

    /// Returns true if a fetch for `key` is in progress.
    pub fn is_loading(&self, key: &str) -> bool {
        self.loading.get(key).copied().unwrap_or(false)
    }

    /// Returns the error recorded for `key`.
    pub fn error(&self, key: &str) -> Option<&ResourceError> {
        self.errors.get(key).and_then(Option::as_ref)
    }

    /// Returns when `key` was last fetched successfully.
    pub fn last_fetch(&self, key: &str) -> Option<Instant> {
        self.last_fetch.get(key).copied()
    }

    /// Returns true if a record or list is cached under `key`.
    pub fn has_cached(&self, key: &str) -> bool {
        self.data.contains_key(key) || self.lists.contains_key(key)
    }

    /// Returns true if `key` holds data fetched less than `cache_time` before `now`.
    pub fn is_fresh(&self, key: &str, cache_time: Duration, now: Instant) -> bool {
        match self.last_fetch(key) {
            Some(fetched) => self.has_cached(key) && now.saturating_duration_since(fetched) < cache_time,
            None => false,
        }
    }

    /// Iterates over cached records.
    pub fn records(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over cached lists.
    pub fn lists(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.lists.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
            && self.lists.is_empty()
            && self.loading.is_empty()
            && self.errors.is_empty()
            && self.last_fetch.is_empty()
    }
}

fn insert(list: &mut Vec<Record>, record: Record, position: InsertPosition) {
    match position {
        InsertPosition::Append => list.push(record),
        InsertPosition::Prepend => list.insert(0, record),
    }
}
