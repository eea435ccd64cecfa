//! Executes a single workflow step against a live session

use std::time::{Duration, Instant};

use tracing::{debug, warn};
use vidprobe_common::StepResult;

use crate::browser::BrowserSession;
use crate::error::{RunnerError, RunnerResult, StepFailure};
use crate::evidence::{capture, evidence_name, failure_evidence_name, EvidenceSink};
use crate::workflow::{StepAction, WorkflowStep};

/// Slack on top of a wait step's own timeout, so the driver's timeout error
/// arrives before this side gives up on the command.
pub const WAIT_GRACE: Duration = Duration::from_secs(2);

/// Runs steps for one run. Never panics past its boundary: every browser or
/// evidence error comes back as a [`StepFailure`].
pub struct StepExecutor<'a> {
    session: &'a mut dyn BrowserSession,
    evidence: &'a dyn EvidenceSink,
    run_id: &'a str,
    capture_failure_evidence: bool,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        session: &'a mut dyn BrowserSession,
        evidence: &'a dyn EvidenceSink,
        run_id: &'a str,
    ) -> Self {
        Self {
            session,
            evidence,
            run_id,
            capture_failure_evidence: false,
        }
    }

    pub fn capture_failure_evidence(mut self, enabled: bool) -> Self {
        self.capture_failure_evidence = enabled;
        self
    }

    /// Perform `step` and capture its evidence
    pub async fn run_step(&mut self, index: usize, step: &WorkflowStep) -> Result<StepResult, StepFailure> {
        let start = Instant::now();
        debug!("Executing step {}: {}", index + 1, step.name);

        if let Err(e) = self.perform(&step.action).await {
            debug!("Step {} failed after {} ms: {}", index + 1, start.elapsed().as_millis(), e);
            return Err(StepFailure::new(&step.name, e.to_string()));
        }

        let name = evidence_name(self.run_id, index);
        match capture(&mut *self.session, self.evidence, &name).await {
            Ok(reference) => {
                debug!("Step {} succeeded in {} ms", index + 1, start.elapsed().as_millis());
                Ok(StepResult::success(&step.name, Some(reference)))
            }
            Err(e) => Err(StepFailure::new(
                &step.name,
                format!("evidence capture failed: {}", e),
            )),
        }
    }

    /// The result recorded for a failed step. Failure screenshots are best effort.
    pub async fn failed_result(&mut self, index: usize, failure: &StepFailure) -> StepResult {
        let result = StepResult::failed(&failure.step, &failure.message);
        if !self.capture_failure_evidence {
            return result;
        }

        let name = failure_evidence_name(self.run_id, index);
        match capture(&mut *self.session, self.evidence, &name).await {
            Ok(reference) => result.with_evidence(reference),
            Err(e) => {
                warn!("Could not capture failure evidence for step {}: {}", index + 1, e);
                result
            }
        }
    }

    async fn perform(&mut self, action: &StepAction) -> RunnerResult<()> {
        match action {
            StepAction::Navigate { url } => self.session.navigate(url).await,
            StepAction::Submit {
                input_selector,
                value,
                button_selector,
            } => {
                self.session.fill(input_selector, value).await?;
                self.session.click(button_selector).await
            }
            StepAction::WaitFor { selector, timeout_ms } => {
                let limit = Duration::from_millis(*timeout_ms) + WAIT_GRACE;
                match tokio::time::timeout(limit, self.session.wait_for_selector(selector, *timeout_ms)).await {
                    Ok(result) => result,
                    Err(_) => Err(RunnerError::Timeout(format!(
                        "{} ({}ms exceeded)",
                        selector, timeout_ms
                    ))),
                }
            }
        }
    }
}
