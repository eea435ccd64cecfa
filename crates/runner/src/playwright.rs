//! Playwright browser automation
//!
//! Each session is one long-lived `node` process running a small driver
//! script. Commands go to the driver as JSON lines on stdin and every command
//! is answered with exactly one JSON line on stdout carrying the same `id`:
//!
//! ```text
//! -> {"id":1,"op":"navigate","url":"https://video-converter.com"}
//! <- {"id":1,"ok":true}
//! -> {"id":2,"op":"screenshot","full_page":false}
//! <- {"id":2,"ok":true,"data":"iVBORw0KGgo..."}
//! -> {"id":3,"op":"wait_for_selector","selector":"div#download-link","timeout_ms":30000}
//! <- {"id":3,"ok":false,"error":"Timeout 30000ms exceeded."}
//! ```
//!
//! A reply whose `id` does not match the pending command belongs to a command
//! the caller stopped waiting for and is discarded.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::error::{RunnerError, RunnerResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// `node` executable used to run the driver
    pub node_binary: PathBuf,
    /// Exported as `NODE_PATH` so the driver can resolve `playwright`
    pub node_path: Option<PathBuf>,
    /// Upper bound on any single driver command
    pub command_timeout_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            node_binary: PathBuf::from("node"),
            node_path: None,
            command_timeout_ms: 60_000,
        }
    }
}

/// Launches Playwright-backed sessions
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Check that node can resolve the `playwright` package
    pub fn check_installed(&self) -> RunnerResult<()> {
        let mut cmd = Command::new(&self.config.node_binary);
        cmd.args(["-e", "require.resolve('playwright')"])
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(node_path) = &self.config.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        match cmd.status() {
            Ok(status) if status.success() => Ok(()),
            _ => Err(RunnerError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self) -> RunnerResult<Box<dyn BrowserSession>> {
        let session = PlaywrightSession::spawn(&self.config).await?;
        Ok(Box::new(session))
    }
}

/// Build the driver script for a configuration
pub fn driver_script(config: &PlaywrightConfig) -> String {
    format!(
        r#"
const readline = require('readline');
const {{ chromium, firefox, webkit }} = require('playwright');

const reply = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  const rl = readline.createInterface({{ input: process.stdin }});

  reply({{ ok: true, ready: true }});

  for await (const line of rl) {{
    if (!line.trim()) continue;
    let cmd;
    try {{
      cmd = JSON.parse(line);
    }} catch (error) {{
      reply({{ ok: false, error: 'malformed command: ' + error.message }});
      continue;
    }}
    const answer = (msg) => reply(Object.assign({{ id: cmd.id }}, msg));
    try {{
      switch (cmd.op) {{
        case 'navigate':
          await page.goto(cmd.url);
          answer({{ ok: true }});
          break;
        case 'fill':
          await page.fill(cmd.selector, cmd.value);
          answer({{ ok: true }});
          break;
        case 'click':
          await page.click(cmd.selector);
          answer({{ ok: true }});
          break;
        case 'wait_for_selector':
          await page.waitForSelector(cmd.selector, {{ timeout: cmd.timeout_ms }});
          answer({{ ok: true }});
          break;
        case 'screenshot': {{
          const buffer = await page.screenshot({{ fullPage: !!cmd.full_page }});
          answer({{ ok: true, data: buffer.toString('base64') }});
          break;
        }}
        case 'close':
          await browser.close();
          answer({{ ok: true }});
          process.exit(0);
        default:
          answer({{ ok: false, error: 'unknown op: ' + cmd.op }});
      }}
    }} catch (error) {{
      answer({{ ok: false, error: error.message }});
    }}
  }}

  await browser.close();
}})().catch((error) => {{
  reply({{ ok: false, error: error.message }});
  process.exit(1);
}});
"#,
        browser = config.browser.as_str(),
        headless = config.headless,
        width = config.viewport_width,
        height = config.viewport_height,
    )
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum DriverCommand<'a> {
    Navigate { url: &'a str },
    Fill { selector: &'a str, value: &'a str },
    Click { selector: &'a str },
    WaitForSelector { selector: &'a str, timeout_ms: u64 },
    Screenshot { full_page: bool },
    Close,
}

impl DriverCommand<'_> {
    fn describe(&self) -> String {
        match self {
            DriverCommand::Navigate { url } => format!("navigate:{}", url),
            DriverCommand::Fill { selector, .. } => format!("fill:{}", selector),
            DriverCommand::Click { selector } => format!("click:{}", selector),
            DriverCommand::WaitForSelector { selector, .. } => format!("wait:{}", selector),
            DriverCommand::Screenshot { .. } => "screenshot".to_string(),
            DriverCommand::Close => "close".to_string(),
        }
    }
}

/// A command tagged with its request id
#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    cmd: &'a DriverCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    /// Absent on the launch announcement and on driver crashes
    #[serde(default)]
    id: Option<u64>,
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<String>,
}

/// One browser page driven through a node child process
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    command_timeout: Duration,
    next_id: u64,
    closed: bool,
    // Holds the driver script on disk for the life of the process
    _script_dir: tempfile::TempDir,
}

impl PlaywrightSession {
    async fn spawn(config: &PlaywrightConfig) -> RunnerResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        tokio::fs::write(&script_path, driver_script(config)).await?;

        let mut cmd = TokioCommand::new(&config.node_binary);
        cmd.arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &config.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        let mut child = cmd.spawn().map_err(|e| {
            RunnerError::Driver(format!(
                "failed to spawn {}: {}",
                config.node_binary.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| RunnerError::Driver("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Driver("driver stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "vidprobe_runner::driver", "{}", line);
                }
            });
        }

        let mut session = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            next_id: 0,
            closed: false,
            _script_dir: script_dir,
        };

        // The driver announces itself once the browser is up.
        let ready = tokio::time::timeout(session.command_timeout, session.read_reply(None)).await;
        match ready {
            Ok(Ok(reply)) if reply.ok => {
                info!("Launched {} browser session", config.browser.as_str());
                Ok(session)
            }
            Ok(Ok(reply)) => {
                let _ = session.child.kill().await;
                Err(RunnerError::Driver(
                    reply.error.unwrap_or_else(|| "browser failed to launch".to_string()),
                ))
            }
            Ok(Err(e)) => {
                let _ = session.child.kill().await;
                Err(e)
            }
            Err(_) => {
                let _ = session.child.kill().await;
                Err(RunnerError::Timeout("browser launch".to_string()))
            }
        }
    }

    async fn read_reply(&mut self, expected: Option<u64>) -> RunnerResult<DriverReply> {
        loop {
            match self.stdout.next_line().await? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<DriverReply>(line) {
                        Ok(reply) if reply.id == expected => return Ok(reply),
                        Ok(reply) => {
                            debug!("Discarding stale driver reply {:?} (waiting for {:?})", reply.id, expected)
                        }
                        // Page console output and the like
                        Err(_) => debug!(target: "vidprobe_runner::driver", "{}", line),
                    }
                }
                None => return Err(RunnerError::Driver("driver exited unexpectedly".to_string())),
            }
        }
    }

    async fn request(&mut self, cmd: DriverCommand<'_>, deadline: Duration) -> RunnerResult<DriverReply> {
        if self.closed {
            return Err(RunnerError::Driver("session already closed".to_string()));
        }

        self.next_id += 1;
        let id = self.next_id;
        let describe = cmd.describe();
        let mut line = serde_json::to_string(&Request { id, cmd: &cmd })?;
        line.push('\n');

        debug!("Driver command: {}", describe);
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        let reply = tokio::time::timeout(deadline, self.read_reply(Some(id)))
            .await
            .map_err(|_| RunnerError::Timeout(describe.clone()))??;

        if reply.ok {
            Ok(reply)
        } else {
            Err(RunnerError::Driver(
                reply.error.unwrap_or_else(|| format!("{} failed", describe)),
            ))
        }
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn navigate(&mut self, url: &str) -> RunnerResult<()> {
        self.request(DriverCommand::Navigate { url }, self.command_timeout).await?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> RunnerResult<()> {
        self.request(DriverCommand::Fill { selector, value }, self.command_timeout).await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> RunnerResult<()> {
        self.request(DriverCommand::Click { selector }, self.command_timeout).await?;
        Ok(())
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout_ms: u64) -> RunnerResult<()> {
        // Leave room for Playwright's own timeout error to arrive first.
        let deadline = Duration::from_millis(timeout_ms) + self.command_timeout;
        self.request(DriverCommand::WaitForSelector { selector, timeout_ms }, deadline).await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> RunnerResult<Vec<u8>> {
        let reply = self
            .request(DriverCommand::Screenshot { full_page: false }, self.command_timeout)
            .await?;
        let data = reply
            .data
            .ok_or_else(|| RunnerError::Driver("screenshot reply carried no data".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|e| RunnerError::Driver(format!("invalid screenshot encoding: {}", e)))
    }

    async fn close(&mut self) -> RunnerResult<()> {
        if self.closed {
            return Ok(());
        }

        let result = self.request(DriverCommand::Close, self.command_timeout).await;
        self.closed = true;

        match tokio::time::timeout(self.command_timeout, self.child.wait()).await {
            Ok(Ok(status)) => debug!("Driver exited with {}", status),
            _ => {
                warn!("Driver did not exit after close, killing it");
                let _ = self.child.kill().await;
            }
        }

        result.map(|_| ())
    }
}
