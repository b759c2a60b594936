//! HTTP connector implementation.
//!
//! This module provides a JSON-over-HTTP connector. The actual HTTP client is
//! abstracted via a trait to allow different implementations (reqwest, hyper,
//! etc.).

use crate::error::{ConnectorError, ConnectorResult};
use crate::transport::{Connector, Method};
use async_trait::async_trait;
use entcache_protocol::{canonical_json, Envelope, Params};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. A returned
/// `Err` means no response body was obtained.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response body.
    async fn send(&self, method: Method, url: &str, body: Option<Vec<u8>>) -> Result<Vec<u8>, String>;
}

/// HTTP-based connector.
///
/// Uses JSON for request and response bodies. Query parameters of GET
/// requests are URL-encoded; string values are sent as-is, other values as
/// their JSON text.
pub struct HttpConnector<H: HttpClient> {
    /// Base URL of the API (e.g., "https://api.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: H,
    /// Last transport error message.
    last_error: RwLock<Option<String>>,
}

impl<H: HttpClient> HttpConnector<H> {
    /// Creates a new HTTP connector.
    pub fn new(base_url: impl Into<String>, client: H) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the client.
    pub fn client(&self) -> &H {
        &self.client
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Builds the request URL for `endpoint`.
    pub fn url(&self, endpoint: &str, params: Option<&Params>) -> String {
        let mut url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        if let Some(params) = params.filter(|p| !p.is_empty()) {
            let query: Vec<String> = params
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(s) => s.clone(),
                        other => canonical_json(other),
                    };
                    format!("{}={}", urlencoding::encode(name), urlencoding::encode(&value))
                })
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: Option<&Params>,
        body: Option<&Value>,
    ) -> ConnectorResult<Envelope> {
        let body = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ConnectorError::Unknown(format!("failed to encode request: {e}")))?;

        let url = self.url(endpoint, params);
        let response = self.client.send(method, &url, body).await.map_err(|e| {
            warn!(%method, %url, error = %e, "request failed");
            *self.last_error.write() = Some(e.clone());
            ConnectorError::Network(e)
        })?;
        *self.last_error.write() = None;

        serde_json::from_slice(&response)
            .map_err(|e| ConnectorError::Unknown(format!("failed to decode response: {e}")))
    }
}

#[async_trait]
impl<H: HttpClient> Connector for HttpConnector<H> {
    async fn get(&self, endpoint: &str, params: Option<&Params>) -> ConnectorResult<Envelope> {
        self.request(Method::Get, endpoint, params, None).await
    }

    async fn post(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.request(Method::Post, endpoint, None, Some(data)).await
    }

    async fn put(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.request(Method::Put, endpoint, None, Some(data)).await
    }

    async fn patch(&self, endpoint: &str, data: &Value) -> ConnectorResult<Envelope> {
        self.request(Method::Patch, endpoint, None, Some(data)).await
    }

    async fn delete(&self, endpoint: &str, data: Option<&Value>) -> ConnectorResult<Envelope> {
        self.request(Method::Delete, endpoint, None, data).await
    }
}
