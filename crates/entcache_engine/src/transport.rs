//! Connector abstraction over the remote backend.

use crate::error::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use entcache_protocol::{Envelope, Params};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tokio::sync::watch;

/// Request method of a connector call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Replace.
    Put,
    /// Partial update.
    Patch,
    /// Remove.
    Delete,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connector carries requests to the backend.
///
/// This trait abstracts the transport, allowing for different implementations
/// (HTTP, a local key-value store, mock for testing, etc.). Remote failures
/// are returned as failure envelopes; `Err` is reserved for requests that
/// never produced an envelope.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Reads from `endpoint`.
    async fn get(&self, endpoint: &str, params: Option<&Params>) -> ConnectorResult<Envelope>;

    /// Creates under `endpoint`.
    async fn post(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope>;

    /// Replaces `endpoint`.
    async fn put(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope>;

    /// Partially updates `endpoint`.
    async fn patch(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope>;

    /// Removes `endpoint`.
    async fn delete(&self, endpoint: &str, data: Option<&Value>) -> ConnectorResult<Envelope>;
}

/// A call observed by [`MockConnector`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Request method.
    pub method: Method,
    /// Endpoint.
    pub endpoint: String,
    /// Query parameters (GET only).
    pub params: Option<Params>,
    /// Request body.
    pub body: Option<Value>,
}

type Route = (Method, String);

/// A mock connector for testing.
///
/// Responses are scripted per `(method, endpoint)`. One-shot responses are
/// consumed first, then the standing response is used. While held, calls are
/// recorded immediately but do not complete until [`MockConnector::release`].
#[derive(Debug)]
pub struct MockConnector {
    once: Mutex<HashMap<Route, VecDeque<ConnectorResult<Envelope>>>>,
    standing: Mutex<HashMap<Route, ConnectorResult<Envelope>>>,
    calls: Mutex<Vec<Call>>,
    open: watch::Sender<bool>,
}

impl MockConnector {
    /// Creates a new mock connector.
    pub fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self {
            once: Mutex::new(HashMap::new()),
            standing: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            open,
        }
    }

    /// Sets the standing response for `(method, endpoint)`.
    pub fn respond(&self, method: Method, endpoint: &str, response: ConnectorResult<Envelope>) {
        self.standing
            .lock()
            .insert((method, endpoint.to_string()), response);
    }

    /// Queues a response used by exactly one call to `(method, endpoint)`.
    pub fn respond_once(&self, method: Method, endpoint: &str, response: ConnectorResult<Envelope>) {
        self.once
            .lock()
            .entry((method, endpoint.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Makes subsequent calls wait until [`MockConnector::release`].
    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    /// Lets held calls complete.
    pub fn release(&self) {
        self.open.send_replace(true);
    }

    /// Returns every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls to `(method, endpoint)`.
    pub fn call_count(&self, method: Method, endpoint: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.endpoint == endpoint)
            .count()
    }

    /// Returns the total number of calls.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    async fn call(
        &self,
        method: Method,
        endpoint: &str,
        params: Option<&Params>,
        body: Option<&Value>,
    ) -> ConnectorResult<Envelope> {
        self.calls.lock().push(Call {
            method,
            endpoint: endpoint.to_string(),
            params: params.cloned(),
            body: body.cloned(),
        });

        let route = (method, endpoint.to_string());
        let queued = self.once.lock().get_mut(&route).and_then(VecDeque::pop_front);
        let response = queued
            .or_else(|| self.standing.lock().get(&route).cloned())
            .unwrap_or_else(|| {
                Err(ConnectorError::Unknown(format!(
                    "no mock response set for {method} {endpoint}"
                )))
            });

        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        response
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn get(&self, endpoint: &str, params: Option<&Params>) -> ConnectorResult<Envelope> {
        self.call(Method::Get, endpoint, params, None).await
    }

    async fn post(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.call(Method::Post, endpoint, None, Some(data)).await
    }

    async fn put(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.call(Method::Put, endpoint, None, Some(data)).await
    }

    async fn patch(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.call(Method::Patch, endpoint, None, Some(data)).await
    }

    async fn delete(&self, endpoint: &str, data: Option<&Value>) -> ConnectorResult<Envelope> {
        self.call(Method::Delete, endpoint, None, data).await
    }
}
