//! # entcache Protocol
//!
//! Connector contract types for entcache.
//!
//! This crate provides:
//! - `Envelope` for the `{success, data, meta}` / `{success: false, message, error}` wire shape
//! - `ResourceError` and the error taxonomy surfaced by bindings
//! - Deterministic cache key derivation for records, queries and lists
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod envelope;
mod error;
pub mod key;

pub use envelope::{Envelope, ErrorBody, Success};
pub use error::{ErrorCode, ErrorType, FieldErrors, ResourceError};
pub use key::{canonical_json, list_key, query_key, record_key, Params};
