//! # entcache Core
//!
//! Synchronous core of the entcache synchronization layer.
//!
//! This crate provides:
//! - `Record`, `RecordId` and `TempId` for cached entries
//! - `EntityState`, a pure reducer over one entity's cache
//! - `EntityStore`, the shared container of entity snapshots
//! - `InvalidationManager` for cross-entity invalidation fan-out
//! - `RequestLedger` for single-flight fetches and response fencing
//!
//! ## Key Invariants
//!
//! - Every store transition replaces a whole snapshot; readers never see a
//!   partially applied action
//! - Every optimistic entry is eventually confirmed or rolled back
//! - An invalidation notifies each target entity's listeners exactly once
//! - A response from a superseded request never reaches the store

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod invalidation;
mod ledger;
mod record;
mod state;
mod store;

pub use error::{CoreError, CoreResult};
pub use invalidation::{
    InvalidationEvent, InvalidationManager, InvalidationRule, Listener, Predicate, SubscriptionId,
};
pub use ledger::{RequestLedger, Ticket};
pub use record::{Record, RecordId, TempId};
pub use state::{EntityAction, EntityState, InsertPosition};
pub use store::EntityStore;
