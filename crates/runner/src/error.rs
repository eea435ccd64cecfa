//! Error types for the run pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Playwright not found. Install with: npm install playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Reasoning service error: {0}")]
    Reasoning(String),

    #[error("Evidence error: {0}")]
    Evidence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(#[from] vidprobe_common::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// A browser step that did not complete. Fatal to the run, never to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Step failed: {step} - {message}")]
pub struct StepFailure {
    pub step: String,
    pub message: String,
}

impl StepFailure {
    pub fn new(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Why a failed run ended up without a diagnosis
#[derive(Error, Debug)]
pub enum DiagnosisError {
    /// The reasoning service could not be reached or refused the request
    #[error("reasoning service error: {0}")]
    Service(String),

    /// The service answered, but not with a usable diagnosis
    #[error("could not parse diagnosis: {reason}")]
    Parse { reason: String, raw: String },
}

impl From<RunnerError> for DiagnosisError {
    fn from(e: RunnerError) -> Self {
        DiagnosisError::Service(e.to_string())
    }
}
