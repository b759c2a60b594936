//! Aggregation of many bindings into one loading and error state.
//!
//! The orchestrator holds a fixed list of resources and evaluates every one
//! of them on every [`Orchestrator::evaluate`]. It separates a first load
//! (`is_loading`) from a refetch (`is_fetching`) by remembering which
//! resources have settled, i.e. have been observed not loading at least once.
//!
//! ## Key Invariants
//!
//! - The descriptor list never changes after construction
//! - Settlement flips are applied after an evaluation completes, never during it
//! - A changed reset key clears every settlement flag before evaluation

use crate::config::RefetchBehavior;
use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::resource::{Resource, ResourceState};
use crate::transport::Connector;
use entcache_protocol::ResourceError;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// Errors of an evaluation, by resource key.
pub type ErrorMap = BTreeMap<String, ResourceError>;

/// Callback invoked when the set of errors changes.
pub type ErrorCallback = Arc<dyn Fn(&ErrorMap) + Send + Sync>;

/// Opaque token; when it changes, settlement starts over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResetKey(u64);

impl ResetKey {
    /// Creates a key from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Creates a key from anything hashable, e.g. route parameters.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }
}

/// Configuration of an orchestrator.
#[derive(Clone, Default)]
pub struct OrchestratorConfig {
    /// Initial reset key.
    pub reset_key: Option<ResetKey>,
    /// Called with the full error map whenever it changes to a non-empty set.
    pub on_error: Option<ErrorCallback>,
    /// Refetch behavior of query bindings built through [`OrchestratorConfig::scope`].
    pub refetch_behavior: Option<RefetchBehavior>,
}

impl OrchestratorConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial reset key.
    pub fn with_reset_key(mut self, key: ResetKey) -> Self {
        self.reset_key = Some(key);
        self
    }

    /// Sets the error callback.
    ///
    /// It runs whenever the error map differs from the previous evaluation,
    /// including when the last error clears and the map is empty.
    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&ErrorMap) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Sets the refetch behavior of scoped query bindings.
    pub fn with_refetch_behavior(mut self, behavior: RefetchBehavior) -> Self {
        self.refetch_behavior = Some(behavior);
        self
    }

    /// Returns an engine handle whose query bindings use this configuration's
    /// refetch behavior.
    pub fn scope<C: Connector>(&self, engine: &SyncEngine<C>) -> SyncEngine<C> {
        match self.refetch_behavior {
            Some(behavior) => engine.with_refetch_behavior(behavior),
            None => engine.clone(),
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("reset_key", &self.reset_key)
            .field("on_error", &self.on_error.is_some())
            .field("refetch_behavior", &self.refetch_behavior)
            .finish()
    }
}

/// One resource as seen by an evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceView {
    /// The resource's state.
    pub state: ResourceState,
    /// Whether the resource counts towards `is_loading` and `has_errors`.
    pub required: bool,
    /// Whether the resource had settled before this evaluation.
    pub has_settled: bool,
}

/// The aggregate state of an orchestrator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestratedState {
    /// Every resource, by key.
    pub resources: BTreeMap<String, ResourceView>,
    /// Some required resource is loading for the first time.
    pub is_loading: bool,
    /// Some resource is loading.
    pub is_fetching: bool,
    /// Some required resource holds an error.
    pub has_errors: bool,
    /// Errors of every resource, required or optional.
    pub errors: ErrorMap,
}

struct Descriptor {
    key: String,
    resource: Arc<dyn Resource>,
    required: bool,
}

#[derive(Default)]
struct Cycle {
    settled: Vec<bool>,
    reset_key: Option<ResetKey>,
    evaluated_reset_key: Option<ResetKey>,
    error_signature: Vec<(String, String, String)>,
}

/// Aggregates a fixed set of resources.
pub struct Orchestrator {
    descriptors: Vec<Descriptor>,
    on_error: Option<ErrorCallback>,
    cycle: Mutex<Cycle>,
}

impl Orchestrator {
    /// Creates an orchestrator in which every resource is required.
    pub fn new<I, K>(resources: I) -> Self
    where
        I: IntoIterator<Item = (K, Arc<dyn Resource>)>,
        K: Into<String>,
    {
        Self::split(resources, std::iter::empty::<(String, Arc<dyn Resource>)>())
    }

    /// Creates an orchestrator from required and optional resources.
    ///
    /// A key given twice keeps its last resource.
    pub fn split<R, O, K1, K2>(required: R, optional: O) -> Self
    where
        R: IntoIterator<Item = (K1, Arc<dyn Resource>)>,
        O: IntoIterator<Item = (K2, Arc<dyn Resource>)>,
        K1: Into<String>,
        K2: Into<String>,
    {
        let mut descriptors: Vec<Descriptor> = Vec::new();
        let all = required
            .into_iter()
            .map(|(key, resource)| (key.into(), resource, true))
            .chain(
                optional
                    .into_iter()
                    .map(|(key, resource)| (key.into(), resource, false)),
            );
        for (key, resource, required) in all {
            let descriptor = Descriptor {
                key,
                resource,
                required,
            };
            match descriptors.iter_mut().find(|d| d.key == descriptor.key) {
                Some(existing) => *existing = descriptor,
                None => descriptors.push(descriptor),
            }
        }

        let cycle = Cycle {
            settled: vec![false; descriptors.len()],
            ..Cycle::default()
        };
        Self {
            descriptors,
            on_error: None,
            cycle: Mutex::new(cycle),
        }
    }

    /// Applies a configuration.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.on_error = config.on_error;
        let cycle = self.cycle.get_mut();
        cycle.reset_key = config.reset_key;
        cycle.evaluated_reset_key = config.reset_key;
        self
    }

    /// Returns the resource keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.key.as_str())
    }

    /// Sets the reset key. A change takes effect at the next evaluation.
    pub fn set_reset_key(&self, key: ResetKey) {
        self.cycle.lock().reset_key = Some(key);
    }

    /// Evaluates every resource.
    pub fn evaluate(&self) -> OrchestratedState {
        let mut result = OrchestratedState::default();
        let notify;
        {
            let mut cycle = self.cycle.lock();
            if cycle.reset_key != cycle.evaluated_reset_key {
                debug!(resources = self.descriptors.len(), "reset key changed, clearing settlement");
                cycle.settled.iter_mut().for_each(|settled| *settled = false);
                cycle.evaluated_reset_key = cycle.reset_key;
            }

            let states: Vec<ResourceState> = self.descriptors.iter().map(|d| d.resource.state()).collect();

            for ((descriptor, state), &has_settled) in self.descriptors.iter().zip(&states).zip(&cycle.settled) {
                if descriptor.required && state.loading && !has_settled {
                    result.is_loading = true;
                }
                if state.loading {
                    result.is_fetching = true;
                }
                if let Some(error) = &state.error {
                    if descriptor.required {
                        result.has_errors = true;
                    }
                    result.errors.insert(descriptor.key.clone(), error.clone());
                }
                result.resources.insert(
                    descriptor.key.clone(),
                    ResourceView {
                        state: state.clone(),
                        required: descriptor.required,
                        has_settled,
                    },
                );
            }

            for (settled, state) in cycle.settled.iter_mut().zip(&states) {
                if !state.loading {
                    *settled = true;
                }
            }

            let signature: Vec<_> = result
                .errors
                .iter()
                .map(|(key, error)| (key.clone(), error.code.to_string(), error.message.clone()))
                .collect();
            notify = signature != cycle.error_signature;
            cycle.error_signature = signature;
        }

        if notify {
            if let Some(on_error) = &self.on_error {
                on_error(&result.errors);
            }
        }
        result
    }

    /// Refetches one resource.
    pub async fn retry(&self, key: &str) -> EngineResult<()> {
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.key == key)
            .ok_or_else(|| EngineError::UnknownResource(key.to_string()))?;
        debug!(key, "retrying resource");
        descriptor.resource.refetch().await;
        Ok(())
    }

    /// Refetches every resource concurrently.
    pub async fn retry_all(&self) {
        debug!(resources = self.descriptors.len(), "retrying all resources");
        join_all(self.descriptors.iter().map(|d| d.resource.refetch())).await;
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("resources", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}
