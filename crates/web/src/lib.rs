//! vidprobe web API
//!
//! Axum server that triggers workflow runs and serves their stored results.

pub mod config;
pub mod logging;
pub mod server;

pub use config::AppConfig;
pub use server::{router, serve, AppState};
