//! In-memory REST backend.
//!
//! [`MemoryBackend`] implements [`Connector`] over named collections of JSON
//! objects. `"<collection>"` addresses a collection and `"<collection>/<id>"`
//! one of its records. Created records get sequential numeric ids.

use async_trait::async_trait;
use entcache_engine::{Connector, ConnectorError, ConnectorResult, Method};
use entcache_protocol::{Envelope, Params};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A failure queued for the next matching request.
type Injected = (Method, String, ConnectorResult<Envelope>);

/// An in-memory backend for tests.
#[derive(Debug)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    next_id: AtomicU64,
    offline: AtomicBool,
    injected: Mutex<Vec<Injected>>,
    calls: Mutex<HashMap<(Method, String), usize>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            injected: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts a record, assigning an id if it has none. Returns the stored record.
    pub fn insert(&self, collection: &str, record: Value) -> Value {
        let record = self.with_id(record);
        self.collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());
        record
    }

    /// Returns the records of a collection, in insertion order.
    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a record by id.
    pub fn record(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .lock()
            .get(collection)
            .and_then(|records| records.iter().find(|r| id_matches(r, id)).cloned())
    }

    /// Makes every request fail with a network error while `offline` is true.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next request to `(method, endpoint)` return `response`
    /// without touching the data.
    pub fn inject(&self, method: Method, endpoint: &str, response: ConnectorResult<Envelope>) {
        self.injected
            .lock()
            .push((method, endpoint.to_string(), response));
    }

    /// Returns the number of requests to `(method, endpoint)`.
    pub fn call_count(&self, method: Method, endpoint: &str) -> usize {
        self.calls
            .lock()
            .get(&(method, endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Returns the total number of requests.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn with_id(&self, record: Value) -> Value {
        match record {
            Value::Object(mut fields) => {
                match fields.get("id").and_then(Value::as_u64) {
                    // Seeded ids push the counter past themselves.
                    Some(id) => {
                        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
                    }
                    None if !fields.contains_key("id") => {
                        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                        fields.insert("id".into(), Value::from(id));
                    }
                    None => {}
                }
                Value::Object(fields)
            }
            other => other,
        }
    }

    fn handle(
        &self,
        method: Method,
        endpoint: &str,
        params: Option<&Params>,
        body: Option<&Value>,
    ) -> ConnectorResult<Envelope> {
        *self
            .calls
            .lock()
            .entry((method, endpoint.to_string()))
            .or_insert(0) += 1;

        if self.offline.load(Ordering::SeqCst) {
            return Err(ConnectorError::Network("backend offline".into()));
        }
        {
            let mut injected = self.injected.lock();
            if let Some(index) = injected
                .iter()
                .position(|(m, e, _)| *m == method && e == endpoint)
            {
                return injected.remove(index).2;
            }
        }

        let (collection, id) = match endpoint.split_once('/') {
            Some((collection, id)) => (collection, Some(id)),
            None => (endpoint, None),
        };

        match (method, id) {
            (Method::Get, None) => Ok(Envelope::ok(Value::Array(self.list(collection, params)))),
            (Method::Get, Some(id)) => Ok(self
                .record(collection, id)
                .map(Envelope::ok)
                .unwrap_or_else(|| not_found(endpoint))),
            (Method::Post, None) => {
                let record = self.insert(collection, body.cloned().unwrap_or(Value::Object(Map::new())));
                Ok(Envelope::ok(record))
            }
            (Method::Put, Some(id)) => Ok(self.update(collection, id, body, false, endpoint)),
            (Method::Patch, Some(id)) => Ok(self.update(collection, id, body, true, endpoint)),
            (Method::Delete, Some(id)) => {
                let mut collections = self.collections.lock();
                let records = collections.entry(collection.to_string()).or_default();
                let before = records.len();
                records.retain(|r| !id_matches(r, id));
                Ok(if records.len() < before {
                    Envelope::ok(Value::Null)
                } else {
                    not_found(endpoint)
                })
            }
            (method, _) => Ok(Envelope::failure(
                "METHOD_NOT_ALLOWED",
                format!("{method} not allowed on {endpoint}"),
            )),
        }
    }

    /// Returns the records whose fields equal every parameter they carry.
    fn list(&self, collection: &str, params: Option<&Params>) -> Vec<Value> {
        self.records(collection)
            .into_iter()
            .filter(|record| {
                params.map_or(true, |params| {
                    params.iter().all(|(name, expected)| match record.get(name) {
                        Some(actual) => actual == expected,
                        None => true,
                    })
                })
            })
            .collect()
    }

    fn update(&self, collection: &str, id: &str, body: Option<&Value>, merge: bool, endpoint: &str) -> Envelope {
        let mut collections = self.collections.lock();
        let Some(record) = collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|r| id_matches(r, id)))
        else {
            return not_found(endpoint);
        };

        let original_id = record.get("id").cloned();
        let body = body.cloned().unwrap_or(Value::Object(Map::new()));
        match (merge, &mut *record, body) {
            (true, Value::Object(fields), Value::Object(patch)) => fields.extend(patch),
            (_, target, body) => *target = body,
        }
        if let (Some(id), Value::Object(fields)) = (original_id, &mut *record) {
            fields.insert("id".into(), id);
        }
        Envelope::ok(record.clone())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn id_matches(record: &Value, id: &str) -> bool {
    match record.get("id") {
        Some(Value::String(s)) => s == id,
        Some(Value::Number(n)) => n.to_string() == id,
        _ => false,
    }
}

fn not_found(endpoint: &str) -> Envelope {
    Envelope::failure("NOT_FOUND", format!("{endpoint} not found"))
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn get(&self, endpoint: &str, params: Option<&Params>) -> ConnectorResult<Envelope> {
        self.handle(Method::Get, endpoint, params, None)
    }

    async fn post(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.handle(Method::Post, endpoint, None, Some(data))
    }

    async fn put(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.handle(Method::Put, endpoint, None, Some(data))
    }

    async fn patch(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.handle(Method::Patch, endpoint, None, Some(data))
    }

    async fn delete(&self, endpoint: &str, data: Option<&Value>) -> ConnectorResult<Envelope> {
        self.handle(Method::Delete, endpoint, None, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn crud_round() {
        let backend = MemoryBackend::new();
        let created = backend.post("posts", &json!({"title": "a"})).await.unwrap();
        assert_eq!(created.data, Some(json!({"id": 1, "title": "a"})));

        let fetched = backend.get("posts/1", None).await.unwrap();
        assert_eq!(fetched.data, Some(json!({"id": 1, "title": "a"})));

        let patched = backend.patch("posts/1", &json!({"tag": "x"})).await.unwrap();
        assert_eq!(patched.data, Some(json!({"id": 1, "title": "a", "tag": "x"})));

        let replaced = backend.put("posts/1", &json!({"title": "b"})).await.unwrap();
        assert_eq!(replaced.data, Some(json!({"id": 1, "title": "b"})));

        assert!(backend.delete("posts/1", None).await.unwrap().success);
        let missing = backend.get("posts/1", None).await.unwrap();
        assert_eq!(missing.error.map(|e| e.code), Some("NOT_FOUND".to_string()));
        assert_eq!(backend.total_calls(), 6);
    }

    #[tokio::test]
    async fn list_filters_by_params() {
        let backend = MemoryBackend::new();
        backend.insert("posts", json!({"author": 1}));
        backend.insert("posts", json!({"author": 2}));

        let mut params = Params::new();
        params.insert("author".into(), json!(2));
        params.insert("page".into(), json!(1));
        let listed = backend.get("posts", Some(&params)).await.unwrap();
        assert_eq!(listed.data, Some(json!([{"id": 2, "author": 2}])));
    }

    #[test]
    fn seeded_ids_advance_the_counter() {
        let backend = MemoryBackend::new();
        backend.insert("tags", json!({"id": 10}));
        assert_eq!(backend.insert("tags", json!({})), json!({"id": 11}));
    }

    #[tokio::test]
    async fn offline_and_injected_failures() {
        let backend = MemoryBackend::new();
        backend.set_offline(true);
        assert!(matches!(
            backend.get("posts", None).await,
            Err(ConnectorError::Network(_))
        ));
        backend.set_offline(false);

        backend.inject(Method::Post, "posts", Ok(Envelope::failure("CONFLICT", "taken")));
        let rejected = backend.post("posts", &json!({})).await.unwrap();
        assert!(!rejected.success);
        assert!(backend.records("posts").is_empty());
        assert!(backend.post("posts", &json!({})).await.unwrap().success);
    }
}
