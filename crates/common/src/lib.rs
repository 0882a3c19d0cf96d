//! Persistcheck Common Library
//!
//! Data model shared by the persistence verification harness: roles and
//! credentials, participation records, audit entries, the API envelope, and
//! an SQLite mirror of the application's data layer.

pub mod db;
pub mod error;
pub mod types;

pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

/// Persistcheck version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
