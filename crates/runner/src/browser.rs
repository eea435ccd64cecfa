//! Browser capability seam.
//!
//! The orchestrator only ever talks to these traits. [`crate::playwright`]
//! provides the production implementation; tests substitute scripted fakes.

use async_trait::async_trait;

use crate::error::RunnerResult;

/// Starts browser sessions. One session is launched per run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> RunnerResult<Box<dyn BrowserSession>>;
}

/// A live page in a launched browser
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> RunnerResult<()>;

    async fn fill(&mut self, selector: &str, value: &str) -> RunnerResult<()>;

    async fn click(&mut self, selector: &str) -> RunnerResult<()>;

    /// Resolves once `selector` is present, or fails after `timeout_ms`.
    async fn wait_for_selector(&mut self, selector: &str, timeout_ms: u64) -> RunnerResult<()>;

    /// PNG bytes of the current viewport
    async fn screenshot(&mut self) -> RunnerResult<Vec<u8>>;

    /// Shuts the browser down. Called exactly once per session.
    async fn close(&mut self) -> RunnerResult<()>;
}
