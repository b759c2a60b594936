//! # entcache Engine
//!
//! Asynchronous bindings over the entcache store.
//!
//! This crate provides:
//! - The `Connector` transport abstraction, a scripted `MockConnector` and a
//!   JSON `HttpConnector`
//! - `SyncEngine`, the container that owns the connector, store and
//!   invalidation manager and creates bindings
//! - `QueryBinding` for cached reads with single-flight, staleness and
//!   stale-while-revalidate handling
//! - `MutationBinding` for create/update/patch/delete with optimistic writes,
//!   rollback and invalidation fan-out
//! - `Orchestrator` for aggregating many bindings into one loading state
//!
//! ## Architecture
//!
//! Bindings never talk to each other. They meet in the store:
//! 1. A query binding checks freshness, asks the request ledger for a ticket,
//!    calls the connector and writes the response to the store
//! 2. A mutation binding writes to the store directly, then invalidates
//!    related entities
//! 3. Invalidation marks query bindings of those entities, whose next sync is
//!    a forced fetch
//!
//! ## Key Invariants
//!
//! - Backend failures are data; only caller mistakes return `Err`
//! - At most one non-forced request per cache key is in flight
//! - A superseded response never reaches the store
//! - A failed mutation leaves no optimistic entry behind

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod http;
mod mutation;
mod orchestrator;
mod query;
mod resource;
mod transport;

pub use config::{CacheStrategy, RefetchBehavior, SyncConfig, DEFAULT_CACHE_TIME};
pub use engine::{EngineStats, SyncEngine};
pub use error::{ConnectorError, ConnectorResult, EngineError, EngineResult};
pub use http::{HttpClient, HttpConnector};
pub use mutation::{
    MutationBinding, MutationOptions, MutationOutcome, MutationRequest, MutationState, Validator,
};
pub use orchestrator::{
    ErrorCallback, ErrorMap, OrchestratedState, Orchestrator, OrchestratorConfig, ResetKey,
    ResourceView,
};
pub use query::{FetchOutcome, QueryBinding, QueryOptions, QueryState, QueryTarget};
pub use resource::{Resource, ResourceData, ResourceState};
pub use transport::{Call, Connector, Method, MockConnector};
