//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up engines over an in-memory
//! backend and common test data.

use crate::backend::MemoryBackend;
use entcache_engine::{SyncConfig, SyncEngine};
use entcache_protocol::Params;
use serde_json::{json, Value};

/// Creates an engine over an empty in-memory backend.
pub fn memory_engine() -> SyncEngine<MemoryBackend> {
    SyncEngine::new(SyncConfig::default(), MemoryBackend::new())
}

/// Creates an engine over a backend holding [`blog_backend`]'s data.
pub fn blog_engine() -> SyncEngine<MemoryBackend> {
    SyncEngine::new(SyncConfig::default(), blog_backend())
}

/// Creates a backend with two users, three posts and two comments.
pub fn blog_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.insert("users", user(1, "Ada"));
    backend.insert("users", user(2, "Grace"));
    backend.insert("posts", post(1, 1, "Notes on the engine"));
    backend.insert("posts", post(2, 1, "Sketch of an algorithm"));
    backend.insert("posts", post(3, 2, "Compilers"));
    backend.insert("comments", comment(1, 1, "First!"));
    backend.insert("comments", comment(2, 3, "Nice"));
    backend
}

/// A user record.
pub fn user(id: u64, name: &str) -> Value {
    json!({ "id": id, "name": name })
}

/// A post record.
pub fn post(id: u64, author: u64, title: &str) -> Value {
    json!({ "id": id, "author": author, "title": title })
}

/// A comment record.
pub fn comment(id: u64, post: u64, body: &str) -> Value {
    json!({ "id": id, "post": post, "body": body })
}

/// Builds parameters from a JSON object. Anything else yields empty params.
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}
