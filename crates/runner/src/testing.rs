//! Scripted fakes for the browser, evidence and reasoning seams.
//!
//! Compiled for unit tests and behind the `test-support` feature so the web
//! crate can drive the full pipeline without node or network access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::error::{RunnerError, RunnerResult};
use crate::evidence::EvidenceSink;
use crate::llm::{CompletionOptions, ReasoningService};

/// Stand-in for PNG bytes
pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake";

#[derive(Default)]
struct BrowserScript {
    calls: Vec<String>,
    failures: HashMap<String, String>,
    hangs: Vec<String>,
    launch_error: Option<String>,
    launches: usize,
    closes: usize,
}

/// Browser fake driven by per-operation scripts.
///
/// Operations are keyed `navigate`, `fill`, `click`, `wait`, `screenshot`
/// and `close`. Clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedBrowser {
    script: Arc<Mutex<BrowserScript>>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call to `op` fails with a driver error carrying `message`
    pub fn fail_on(self, op: &str, message: &str) -> Self {
        self.script
            .lock()
            .failures
            .insert(op.to_string(), message.to_string());
        self
    }

    /// Every call to `op` never resolves
    pub fn hang_on(self, op: &str) -> Self {
        self.script.lock().hangs.push(op.to_string());
        self
    }

    /// `launch` fails with a driver error carrying `message`
    pub fn fail_launch(self, message: &str) -> Self {
        self.script.lock().launch_error = Some(message.to_string());
        self
    }

    pub fn session(&self) -> ScriptedSession {
        ScriptedSession {
            script: self.script.clone(),
        }
    }

    /// Operations in call order, e.g. `navigate:https://...`
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn launches(&self) -> usize {
        self.script.lock().launches
    }

    pub fn closes(&self) -> usize {
        self.script.lock().closes
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedBrowser {
    async fn launch(&self) -> RunnerResult<Box<dyn BrowserSession>> {
        let mut script = self.script.lock();
        script.launches += 1;
        if let Some(message) = &script.launch_error {
            return Err(RunnerError::Driver(message.clone()));
        }
        drop(script);
        Ok(Box::new(self.session()))
    }
}

pub struct ScriptedSession {
    script: Arc<Mutex<BrowserScript>>,
}

impl ScriptedSession {
    async fn record(&self, op: &str, call: String) -> RunnerResult<()> {
        let hang = {
            let mut script = self.script.lock();
            script.calls.push(call);
            if let Some(message) = script.failures.get(op) {
                return Err(RunnerError::Driver(message.clone()));
            }
            script.hangs.iter().any(|h| h == op)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> RunnerResult<()> {
        self.record("navigate", format!("navigate:{}", url)).await
    }

    async fn fill(&mut self, selector: &str, value: &str) -> RunnerResult<()> {
        self.record("fill", format!("fill:{}={}", selector, value)).await
    }

    async fn click(&mut self, selector: &str) -> RunnerResult<()> {
        self.record("click", format!("click:{}", selector)).await
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout_ms: u64) -> RunnerResult<()> {
        self.record("wait", format!("wait:{}", selector)).await
    }

    async fn screenshot(&mut self) -> RunnerResult<Vec<u8>> {
        self.record("screenshot", "screenshot".to_string()).await?;
        Ok(FAKE_PNG.to_vec())
    }

    async fn close(&mut self) -> RunnerResult<()> {
        self.script.lock().closes += 1;
        self.record("close", "close".to_string()).await
    }
}

/// Evidence sink that keeps everything in memory
#[derive(Clone, Default)]
pub struct MemoryEvidence {
    items: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl MemoryEvidence {
    pub fn names(&self) -> Vec<String> {
        self.items.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.items
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
    }
}

#[async_trait]
impl EvidenceSink for MemoryEvidence {
    async fn write(&self, name: &str, bytes: &[u8]) -> RunnerResult<String> {
        self.items.lock().push((name.to_string(), bytes.to_vec()));
        Ok(name.to_string())
    }
}

enum Reply {
    Text(String),
    Empty,
    Error(String),
}

/// Reasoning service returning a canned reply and recording prompts
pub struct ScriptedReasoner {
    reply: Reply,
    latency: Duration,
    calls: Mutex<Vec<(String, CompletionOptions)>>,
}

impl ScriptedReasoner {
    pub fn replying(text: &str) -> Self {
        Self::with_reply(Reply::Text(text.to_string()))
    }

    /// Answers without content
    pub fn silent() -> Self {
        Self::with_reply(Reply::Empty)
    }

    pub fn failing(message: &str) -> Self {
        Self::with_reply(Reply::Error(message.to_string()))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Wait `latency` before answering
    pub fn slow(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// `(prompt, options)` for every completion requested so far
    pub fn calls(&self) -> Vec<(String, CompletionOptions)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> RunnerResult<Option<String>> {
        self.calls.lock().push((prompt.to_string(), options.clone()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.reply {
            Reply::Text(text) => Ok(Some(text.clone())),
            Reply::Empty => Ok(None),
            Reply::Error(message) => Err(RunnerError::Reasoning(message.clone())),
        }
    }
}
