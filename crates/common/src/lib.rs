//! vidprobe Common Library
//!
//! Run record model, error taxonomy and the SQLite result store shared by the
//! runner and the web API.

pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

/// vidprobe version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
