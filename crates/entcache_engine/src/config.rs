//! Configuration for the sync engine.

use entcache_core::InsertPosition;
use std::time::Duration;

/// Default time a fetched key stays fresh.
pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

/// What a query reports while its key is being fetched for the first time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchBehavior {
    /// Report `loading` with no data until the key resolves.
    Blocking,
    /// Keep showing the previous key's data, not loading, until the new key
    /// resolves.
    #[default]
    StaleWhileRevalidate,
}

/// How a successful mutation updates its own entity's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStrategy {
    /// Write the server's record into the cached record and every cached list.
    #[default]
    DirectPatch,
    /// Mark the entity stale and notify its subscribers so they refetch.
    Invalidate,
}

/// Configuration for sync operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long a successful fetch stays fresh.
    pub cache_time: Duration,
    /// Default refetch behavior of query bindings.
    pub refetch_behavior: RefetchBehavior,
    /// Where created records are placed in cached lists.
    pub insert_position: InsertPosition,
    /// Default cache strategy of mutation bindings.
    pub cache_strategy: CacheStrategy,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            cache_time: DEFAULT_CACHE_TIME,
            refetch_behavior: RefetchBehavior::default(),
            insert_position: InsertPosition::default(),
            cache_strategy: CacheStrategy::default(),
        }
    }

    /// Sets the cache time.
    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = cache_time;
        self
    }

    /// Sets the refetch behavior.
    pub fn with_refetch_behavior(mut self, behavior: RefetchBehavior) -> Self {
        self.refetch_behavior = behavior;
        self
    }

    /// Sets the list insert position.
    pub fn with_insert_position(mut self, position: InsertPosition) -> Self {
        self.insert_position = position;
        self
    }

    /// Sets the cache strategy.
    pub fn with_cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}
