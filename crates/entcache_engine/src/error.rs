//! Error types for the engine.

use crate::transport::Method;
use entcache_protocol::ResourceError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for connector calls.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Caller errors.
///
/// These are programming mistakes that fail the single call that made them.
/// Failures of the remote side are never reported here; bindings return
/// them as [`ResourceError`] data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The method cannot be used for a mutation.
    #[error("unsupported mutation method: {0}")]
    UnsupportedMethod(Method),

    /// The method addresses a single record but no id was given.
    #[error("{0} mutation requires a record id")]
    MissingId(Method),

    /// The orchestrator has no resource under this key.
    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

/// Failure of the connector itself, before any envelope was produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    /// Connectivity failure.
    #[error("network error: {0}")]
    Network(String),

    /// Unexpected failure, e.g. an undecodable response.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl From<ConnectorError> for ResourceError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Network(message) => ResourceError::network(message),
            ConnectorError::Unknown(message) => ResourceError::unknown(message),
        }
    }
}
