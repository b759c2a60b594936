//! Error taxonomy surfaced by bindings.
//!
//! Every failure a binding reports is a [`ResourceError`] value, never a panic.
//! The code is one of the client-side codes (`VALIDATION_ERROR`,
//! `NETWORK_ERROR`, `UNKNOWN_ERROR`) or a code supplied by the transport,
//! passed through unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-field validation messages.
pub type FieldErrors = BTreeMap<String, String>;

/// Machine-readable error code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// Client-side schema rejection. Never reaches the transport.
    Validation,
    /// Connectivity failure.
    Network,
    /// Unexpected failure with no better classification.
    Unknown,
    /// Transport-supplied domain code, e.g. `NOT_FOUND`.
    Domain(String),
}

impl ErrorCode {
    /// Wire form of the validation code.
    pub const VALIDATION: &'static str = "VALIDATION_ERROR";
    /// Wire form of the network code.
    pub const NETWORK: &'static str = "NETWORK_ERROR";
    /// Wire form of the unknown code.
    pub const UNKNOWN: &'static str = "UNKNOWN_ERROR";

    /// Parses a wire code. Unrecognized codes become [`ErrorCode::Domain`].
    pub fn from_code(code: &str) -> Self {
        match code {
            Self::VALIDATION => ErrorCode::Validation,
            Self::NETWORK => ErrorCode::Network,
            Self::UNKNOWN => ErrorCode::Unknown,
            other => ErrorCode::Domain(other.to_string()),
        }
    }

    /// Returns the wire form of the code.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::Validation => Self::VALIDATION,
            ErrorCode::Network => Self::NETWORK,
            ErrorCode::Unknown => Self::UNKNOWN,
            ErrorCode::Domain(code) => code,
        }
    }

    /// Returns true for failures that never produced a server answer.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, ErrorCode::Network | ErrorCode::Unknown)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        ErrorCode::from_code(&code)
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

/// Broad category attached to some failure envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorType {
    /// Authentication or authorization.
    Auth,
    /// Input validation.
    Validation,
    /// A failed write transaction.
    Transaction,
    /// Navigation or routing.
    Navigation,
}

/// A failure reported by a binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ResourceError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Field-level validation messages, if any.
    pub validation: Option<FieldErrors>,
    /// Error category, if the transport supplied one.
    pub kind: Option<ErrorType>,
}

impl ResourceError {
    /// Creates an error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            validation: None,
            kind: None,
        }
    }

    /// Creates a client-side validation error.
    pub fn validation(fields: FieldErrors) -> Self {
        Self {
            code: ErrorCode::Validation,
            message: "Validation failed".into(),
            validation: Some(fields),
            kind: Some(ErrorType::Validation),
        }
    }

    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Network, message)
    }

    /// Creates an unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    /// Creates an error carrying a transport-supplied code.
    pub fn domain(code: impl AsRef<str>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::from_code(code.as_ref()), message)
    }

    /// Attaches field-level validation messages.
    pub fn with_validation(mut self, fields: FieldErrors) -> Self {
        self.validation = Some(fields);
        self
    }

    /// Attaches an error category.
    pub fn with_kind(mut self, kind: ErrorType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Returns the wire code.
    pub fn code_str(&self) -> &str {
        self.code.as_str()
    }
}
