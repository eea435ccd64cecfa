//! Failure diagnosis via the reasoning service

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use vidprobe_common::{Diagnosis, StepResult};

use crate::error::DiagnosisError;
use crate::llm::{CompletionOptions, ReasoningService};

/// Outcome of parsing a completion
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Parsed(Diagnosis),
    Malformed { raw: String, reason: String },
}

/// Asks the reasoning service why a run failed
#[derive(Clone)]
pub struct Diagnoser {
    service: Arc<dyn ReasoningService>,
    options: CompletionOptions,
}

impl Diagnoser {
    pub fn new(service: Arc<dyn ReasoningService>, options: CompletionOptions) -> Self {
        Self { service, options }
    }

    /// One best-effort completion; no retries.
    pub async fn diagnose(&self, error_message: &str, steps: &[StepResult]) -> Result<Diagnosis, DiagnosisError> {
        let prompt = build_prompt(error_message, steps);
        let text = self.service.complete(&prompt, &self.options).await?;

        let Some(text) = text else {
            return Err(DiagnosisError::Parse {
                reason: "reasoning service returned no content".to_string(),
                raw: String::new(),
            });
        };

        match parse_diagnosis(&text) {
            ParseResult::Parsed(diagnosis) => {
                debug!("Diagnosis parsed (confidence {:.2})", diagnosis.confidence);
                Ok(diagnosis)
            }
            ParseResult::Malformed { raw, reason } => Err(DiagnosisError::Parse { reason, raw }),
        }
    }
}

pub fn build_prompt(error_message: &str, steps: &[StepResult]) -> String {
    let steps_json = serde_json::to_string(steps).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"Analyze the following failure of an automated browser test that converts a video with a web tool.
Error: {error_message}
Steps: {steps_json}

Respond with only a JSON object in this format:
{{
  "explanation": "<human-readable explanation of the failure>",
  "recommendation": "<recommended remediation>",
  "confidence": <confidence level from 0.0 to 1.0>
}}"#
    )
}

#[derive(Deserialize)]
struct RawDiagnosis {
    explanation: String,
    recommendation: Recommendation,
    confidence: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Recommendation {
    One(String),
    Many(Vec<String>),
}

/// Strict parse of a completion into a [`Diagnosis`]. Never panics; anything
/// unusable comes back as [`ParseResult::Malformed`] with the raw text.
pub fn parse_diagnosis(text: &str) -> ParseResult {
    let malformed = |reason: String| ParseResult::Malformed {
        raw: text.to_string(),
        reason,
    };

    let body = strip_code_fence(text);
    if body.is_empty() {
        return malformed("empty completion".to_string());
    }

    let mut value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => return malformed(format!("not JSON: {}", e)),
    };

    // The payload may arrive wrapped as {"aiAnalysis": {...}}.
    if let Some(inner) = value.get_mut("aiAnalysis") {
        value = inner.take();
    }

    let raw: RawDiagnosis = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => return malformed(format!("unexpected shape: {}", e)),
    };

    if !(0.0..=1.0).contains(&raw.confidence) {
        return malformed(format!("confidence {} outside [0, 1]", raw.confidence));
    }
    if raw.explanation.trim().is_empty() {
        return malformed("empty explanation".to_string());
    }

    let recommendation = match raw.recommendation {
        Recommendation::One(text) => text,
        Recommendation::Many(items) => items.join("\n"),
    };

    ParseResult::Parsed(Diagnosis {
        explanation: raw.explanation,
        recommendation,
        confidence: raw.confidence,
    })
}

/// Body of the first fenced block, or the whole text when there is none.
/// An unterminated fence runs to the end of the text.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(open) = text.find("```") else {
        return text;
    };

    let after = &text[open + 3..];
    // Skip the info string, e.g. `json`
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };

    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}
