//! # entcache Testkit
//!
//! Test utilities for entcache.
//!
//! This crate provides:
//! - `MemoryBackend`, an in-memory REST backend implementing `Connector`
//! - Fixtures for engines seeded with blog data
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entcache_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn reads_a_user() {
//!     init_tracing();
//!     let engine = blog_engine();
//!     let query = engine.record("users", "users", 1);
//!     query.fetch().await;
//!     assert!(query.state().record().is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use backend::MemoryBackend;
pub use fixtures::*;
pub use logging::init_tracing;
