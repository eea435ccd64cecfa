//! Core types for vidprobe runs

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepOutcome {
    Success,
    Failed,
}

/// Final status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(RunStatus::Success),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one browser step.
///
/// `evidence_ref` and `error_detail` are independent: a failed step may
/// still carry evidence when failure screenshots are enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    #[serde(rename = "step")]
    pub name: String,

    #[serde(rename = "status")]
    pub outcome: StepOutcome,

    #[serde(rename = "screenshot", default, skip_serializing_if = "Option::is_none")]
    pub evidence_ref: Option<String>,

    #[serde(rename = "error", default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl StepResult {
    pub fn success(name: impl Into<String>, evidence_ref: Option<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Success,
            evidence_ref,
            error_detail: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Failed,
            evidence_ref: None,
            error_detail: Some(error.into()),
        }
    }

    pub fn with_evidence(mut self, evidence_ref: impl Into<String>) -> Self {
        self.evidence_ref = Some(evidence_ref.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// Advisory explanation of a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub explanation: String,
    pub recommendation: String,
    /// Always within [0.0, 1.0]
    pub confidence: f64,
}

/// Complete record of one run, as persisted
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub final_status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
    pub diagnosis: Option<Diagnosis>,
}

impl RunRecord {
    pub fn ack(&self) -> RunAck {
        RunAck {
            run_id: self.run_id.clone(),
            final_status: self.final_status,
        }
    }
}

/// Minimal acknowledgement handed back to whoever triggered a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunAck {
    pub run_id: String,
    pub final_status: RunStatus,
}

/// Row-level view of a run without its steps
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub final_status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

/// Current time truncated to milliseconds, the precision timestamps are stored at.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// ISO-8601 form used in the store and on the wire, e.g. `2024-05-01T10:00:00.123Z`.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}
