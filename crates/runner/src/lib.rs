//! vidprobe run pipeline
//!
//! Drives a browser through the video-conversion workflow, captures screenshot
//! evidence per step, diagnoses failures through a reasoning service and
//! persists one record per run.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Orchestrator::execute_run(target) -> RunAck                │
//! │    ├── BrowserLauncher::launch() -> BrowserSession          │
//! │    ├── RunState machine over conversion_steps()             │
//! │    │     └── StepExecutor::run_step() -> StepResult         │
//! │    │           └── EvidenceSink::write(stepN-<id>.png)      │
//! │    ├── BrowserSession::close()        (always, once)        │
//! │    ├── Diagnoser::diagnose()          (failed runs only)    │
//! │    └── Database::save(RunRecord)      (exactly once)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PlaywrightLauncher   node driver over JSON lines           │
//! │  LlmClient            OpenAI-compatible or Ollama HTTP      │
//! │  FsEvidenceSink       PNG files in one directory            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod browser;
pub mod diagnoser;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod playwright;
pub mod state;
pub mod workflow;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use browser::{BrowserLauncher, BrowserSession};
pub use diagnoser::{parse_diagnosis, Diagnoser, ParseResult};
pub use error::{DiagnosisError, RunnerError, RunnerResult, StepFailure};
pub use evidence::{EvidenceSink, FsEvidenceSink};
pub use llm::{CompletionOptions, LlmClient, LlmConfig, LlmProvider, ReasoningService};
pub use orchestrator::{Orchestrator, RunIdGenerator};
pub use playwright::{Browser, PlaywrightConfig, PlaywrightLauncher};
pub use workflow::{conversion_steps, WorkflowConfig};
