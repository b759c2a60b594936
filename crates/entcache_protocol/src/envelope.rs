//! Connector response envelope.

use crate::error::{ErrorCode, ErrorType, FieldErrors, ResourceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `error` object of a failure envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code, e.g. `NOT_FOUND`.
    pub code: String,
}

/// Response envelope returned by every connector call.
///
/// Success: `{"success": true, "data": ..., "meta": ...}`.
/// Failure: `{"success": false, "message": ..., "error": {"code": ...},
/// "validation": {...}, "type": "AUTH"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Whether the request succeeded.
    pub success: bool,
    /// Response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Response metadata (pagination etc).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Field-level validation messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<FieldErrors>,
    /// Failure category.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorType>,
}

/// The successful part of an envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Success {
    /// Response payload (`Null` when the server sent none).
    pub data: Value,
    /// Response metadata.
    pub meta: Option<Value>,
}

impl Envelope {
    /// Creates a success envelope.
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: None,
            message: None,
            error: None,
            validation: None,
            kind: None,
        }
    }

    /// Creates a success envelope with metadata.
    pub fn ok_with_meta(data: Value, meta: Value) -> Self {
        Self {
            meta: Some(meta),
            ..Self::ok(data)
        }
    }

    /// Creates a failure envelope.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            meta: None,
            message: Some(message.into()),
            error: Some(ErrorBody { code: code.into() }),
            validation: None,
            kind: None,
        }
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

    /// Splits the envelope into its success payload or its error.
    ///
    /// A failure envelope without an `error.code` is reported as
    /// `UNKNOWN_ERROR`.
    pub fn into_result(self) -> Result<Success, ResourceError> {
        if self.success {
            return Ok(Success {
                data: self.data.unwrap_or(Value::Null),
                meta: self.meta,
            });
        }

        let code = self
            .error
            .map(|body| ErrorCode::from_code(&body.code))
            .unwrap_or(ErrorCode::Unknown);
        Err(ResourceError {
            code,
            message: self.message.unwrap_or_else(|| "Request failed".into()),
            validation: self.validation,
            kind: self.kind,
        })
    }
}

impl From<ResourceError> for Envelope {
    fn from(err: ResourceError) -> Self {
        Self {
            success: false,
            data: None,
            meta: None,
            message: Some(err.message),
            error: Some(ErrorBody {
                code: err.code.as_str().to_string(),
            }),
            validation: err.validation,
            kind: err.kind,
        }
    }
}
