//! Run orchestration
//!
//! One call to [`Orchestrator::execute_run`] launches a browser, walks the
//! conversion workflow step by step, asks for a diagnosis if a step failed and
//! persists exactly one [`RunRecord`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, info_span, warn, Instrument};
use vidprobe_common::{now_millis, Database, Diagnosis, RunAck, RunRecord, RunStatus, StepResult};

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::diagnoser::Diagnoser;
use crate::error::{RunnerResult, StepFailure};
use crate::evidence::EvidenceSink;
use crate::executor::StepExecutor;
use crate::state::{RunEvent, RunState};
use crate::workflow::{conversion_steps, WorkflowConfig, WorkflowStep};

/// Step name recorded when the browser could not be started
pub const LAUNCH_STEP: &str = "Launch browser";

/// Hands out `test-<millis>` ids, strictly increasing within the process
#[derive(Debug, Default)]
pub struct RunIdGenerator {
    last: AtomicI64,
}

impl RunIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return format!("test-{}", candidate),
                Err(actual) => last = actual,
            }
        }
    }
}

pub struct Orchestrator {
    launcher: Arc<dyn BrowserLauncher>,
    evidence: Arc<dyn EvidenceSink>,
    diagnoser: Diagnoser,
    store: Database,
    workflow: WorkflowConfig,
    ids: RunIdGenerator,
}

impl Orchestrator {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        evidence: Arc<dyn EvidenceSink>,
        diagnoser: Diagnoser,
        store: Database,
        workflow: WorkflowConfig,
    ) -> Self {
        Self {
            launcher,
            evidence,
            diagnoser,
            store,
            workflow,
            ids: RunIdGenerator::new(),
        }
    }

    pub fn store(&self) -> &Database {
        &self.store
    }

    /// Run the conversion workflow against `target_url`.
    ///
    /// Browser, evidence and diagnosis problems are recorded in the run and
    /// never surface here; the only error is a failure to persist the record.
    pub async fn execute_run(&self, target_url: &str) -> RunnerResult<RunAck> {
        let run_id = self.ids.next_id();
        let span = info_span!("run", run_id = %run_id);
        self.execute(run_id, target_url).instrument(span).await
    }

    async fn execute(&self, run_id: String, target_url: &str) -> RunnerResult<RunAck> {
        let started_at = now_millis();
        info!("Starting run against {}", target_url);

        let steps = conversion_steps(&self.workflow, target_url);
        let mut results = Vec::with_capacity(steps.len());

        let (state, failure) = match self.launcher.launch().await {
            Ok(mut session) => {
                let outcome = self
                    .drive(session.as_mut(), &run_id, &steps, &mut results)
                    .await;
                if let Err(e) = session.close().await {
                    warn!("Failed to close browser: {}", e);
                }
                outcome?
            }
            Err(e) => {
                warn!("Failed to launch browser: {}", e);
                let failure = StepFailure::new(LAUNCH_STEP, e.to_string());
                results.push(StepResult::failed(&failure.step, &failure.message));
                (RunState::Failed, Some(failure))
            }
        };

        let diagnosis = match &failure {
            Some(failure) => self.diagnose(failure, &results).await,
            None => None,
        };

        let record = RunRecord {
            final_status: state.final_status().unwrap_or(RunStatus::Failed),
            run_id,
            started_at,
            ended_at: now_millis(),
            steps: results,
            diagnosis,
        };

        // Use blocking DB access in a spawn_blocking to avoid holding up the reactor.
        let store = self.store.clone();
        let record = tokio::task::spawn_blocking(move || store.save(&record).map(|_| record)).await??;

        info!(
            "Run finished: {} ({} steps, {} ms)",
            record.final_status,
            record.steps.len(),
            (record.ended_at - record.started_at).num_milliseconds()
        );
        Ok(record.ack())
    }

    /// Walk the steps until one fails. Returns the terminal state and the
    /// failure, if any.
    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        run_id: &str,
        steps: &[WorkflowStep],
        results: &mut Vec<StepResult>,
    ) -> RunnerResult<(RunState, Option<StepFailure>)> {
        let mut executor = StepExecutor::new(session, self.evidence.as_ref(), run_id)
            .capture_failure_evidence(self.workflow.capture_failure_evidence);

        let mut state = RunState::Pending.transition(RunEvent::Start, steps.len())?;
        while let Some(index) = state.step_index() {
            match executor.run_step(index, &steps[index]).await {
                Ok(result) => {
                    results.push(result);
                    state = state.transition(RunEvent::StepSucceeded, steps.len())?;
                }
                Err(failure) => {
                    warn!("{}", failure);
                    results.push(executor.failed_result(index, &failure).await);
                    state = state.transition(RunEvent::StepFailed, steps.len())?;
                    return Ok((state, Some(failure)));
                }
            }
        }

        Ok((state, None))
    }

    async fn diagnose(&self, failure: &StepFailure, steps: &[StepResult]) -> Option<Diagnosis> {
        match self.diagnoser.diagnose(&failure.message, steps).await {
            Ok(diagnosis) => Some(diagnosis),
            Err(e) => {
                warn!("Diagnosis unavailable: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::RunnerError;
    use crate::llm::LlmConfig;
    use crate::testing::{MemoryEvidence, ScriptedBrowser, ScriptedReasoner};
    use vidprobe_common::{RunStatus, StepOutcome};

    const DIAGNOSIS: &str = "```json\n{\"explanation\":\"The converter did not respond\",\"recommendation\":\"Retry later\",\"confidence\":0.6}\n```";
    const TARGET: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    struct Harness {
        orchestrator: Orchestrator,
        browser: ScriptedBrowser,
        evidence: MemoryEvidence,
        reasoner: Arc<ScriptedReasoner>,
    }

    fn harness(browser: ScriptedBrowser, reasoner: ScriptedReasoner) -> Harness {
        harness_on(Database::open_memory().unwrap(), browser, reasoner)
    }

    fn harness_on(store: Database, browser: ScriptedBrowser, reasoner: ScriptedReasoner) -> Harness {
        let evidence = MemoryEvidence::default();
        let reasoner = Arc::new(reasoner);
        let orchestrator = Orchestrator::new(
            Arc::new(browser.clone()),
            Arc::new(evidence.clone()),
            Diagnoser::new(reasoner.clone(), LlmConfig::default().completion_options()),
            store,
            WorkflowConfig::default(),
        );
        Harness {
            orchestrator,
            browser,
            evidence,
            reasoner,
        }
    }

    #[test]
    fn test_run_ids_strictly_increase() {
        let ids = RunIdGenerator::new();
        let parsed: Vec<i64> = (0..100)
            .map(|_| ids.next_id())
            .map(|id| id.strip_prefix("test-").unwrap().parse().unwrap())
            .collect();
        assert!(parsed.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_successful_run() {
        let h = harness(ScriptedBrowser::new(), ScriptedReasoner::replying(DIAGNOSIS));

        let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
        assert_eq!(ack.final_status, RunStatus::Success);
        assert!(ack.run_id.starts_with("test-"));

        let record = h.orchestrator.store().get_by_id(&ack.run_id).unwrap();
        assert_eq!(record.steps.len(), 3);
        assert!(record.steps.iter().all(|s| s.is_success() && s.evidence_ref.is_some()));
        assert!(record.diagnosis.is_none());
        assert!(record.started_at <= record.ended_at);

        assert_eq!(h.evidence.names().len(), 3);
        assert!(h.reasoner.calls().is_empty());
        assert_eq!(h.browser.closes(), 1);
    }

    #[tokio::test]
    async fn test_failure_stops_at_failing_step() {
        for (index, op) in ["navigate", "click", "wait"].iter().enumerate() {
            let h = harness(
                ScriptedBrowser::new().fail_on(op, "net::ERR_NAME_NOT_RESOLVED"),
                ScriptedReasoner::replying(DIAGNOSIS),
            );

            let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
            assert_eq!(ack.final_status, RunStatus::Failed);

            let record = h.orchestrator.store().get_by_id(&ack.run_id).unwrap();
            assert_eq!(record.steps.len(), index + 1, "failing op {}", op);
            assert!(record.steps[..index].iter().all(|s| s.is_success()));

            let last = &record.steps[index];
            assert_eq!(last.outcome, StepOutcome::Failed);
            assert!(last.error_detail.as_deref().unwrap().contains("ERR_NAME_NOT_RESOLVED"));

            let diagnosis = record.diagnosis.expect("diagnosis recorded");
            assert_eq!(diagnosis.recommendation, "Retry later");
            assert_eq!(h.reasoner.calls().len(), 1);
            assert_eq!(h.browser.closes(), 1);
        }
    }

    #[tokio::test]
    async fn test_failing_step_keeps_its_own_name() {
        let h = harness(
            ScriptedBrowser::new().fail_on("wait", "Timeout 30000ms exceeded."),
            ScriptedReasoner::replying(DIAGNOSIS),
        );
        let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
        let record = h.orchestrator.store().get_by_id(&ack.run_id).unwrap();

        let names: Vec<&str> = record.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Navigate to converter", "Input video URL", "Attempt conversion"]);
    }

    #[tokio::test]
    async fn test_diagnosis_failure_still_persists_run() {
        for reasoner in [
            ScriptedReasoner::failing("connection refused"),
            ScriptedReasoner::replying("I am not sure what happened."),
        ] {
            let h = harness(ScriptedBrowser::new().fail_on("navigate", "boom"), reasoner);

            let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
            let record = h.orchestrator.store().get_by_id(&ack.run_id).unwrap();

            assert_eq!(record.final_status, RunStatus::Failed);
            assert!(record.diagnosis.is_none());
        }
    }

    #[tokio::test]
    async fn test_launch_failure_is_recorded() {
        let h = harness(
            ScriptedBrowser::new().fail_launch("Executable doesn't exist"),
            ScriptedReasoner::replying(DIAGNOSIS),
        );

        let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
        assert_eq!(ack.final_status, RunStatus::Failed);

        let record = h.orchestrator.store().get_by_id(&ack.run_id).unwrap();
        assert_eq!(record.steps.len(), 1);
        assert_eq!(record.steps[0].name, LAUNCH_STEP);
        assert!(record.diagnosis.is_some());
        assert_eq!(h.browser.closes(), 0);
    }

    #[tokio::test]
    async fn test_close_error_does_not_fail_run() {
        let h = harness(
            ScriptedBrowser::new().fail_on("close", "browser already gone"),
            ScriptedReasoner::replying(DIAGNOSIS),
        );
        let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
        assert_eq!(ack.final_status, RunStatus::Success);
        assert_eq!(h.browser.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_conversion_times_out() {
        let h = harness(
            ScriptedBrowser::new().hang_on("wait"),
            ScriptedReasoner::replying(DIAGNOSIS),
        );

        let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
        assert_eq!(ack.final_status, RunStatus::Failed);

        let record = h.orchestrator.store().get_by_id(&ack.run_id).unwrap();
        assert_eq!(record.steps.len(), 3);
        assert_eq!(record.steps[2].name, "Attempt conversion");
        assert!(record.steps[2]
            .error_detail
            .as_deref()
            .unwrap()
            .contains("div#download-link (30000ms exceeded)"));
        assert!(record.diagnosis.is_some());
        assert_eq!(h.browser.closes(), 1);
    }

    #[tokio::test]
    async fn test_each_run_gets_its_own_record() {
        let h = harness(ScriptedBrowser::new(), ScriptedReasoner::replying(DIAGNOSIS));

        let first = h.orchestrator.execute_run(TARGET).await.unwrap();
        let second = h.orchestrator.execute_run(TARGET).await.unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(h.orchestrator.store().list_recent(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_end_time_covers_diagnosis() {
        let h = harness(
            ScriptedBrowser::new().fail_on("navigate", "boom"),
            ScriptedReasoner::replying(DIAGNOSIS).slow(Duration::from_millis(50)),
        );

        let ack = h.orchestrator.execute_run(TARGET).await.unwrap();
        let record = h.orchestrator.store().get_by_id(&ack.run_id).unwrap();

        assert!(record.diagnosis.is_some());
        assert!((record.ended_at - record.started_at).num_milliseconds() >= 50);
    }

    #[tokio::test]
    async fn test_store_failure_is_the_only_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.db");
        let store = Database::open(&path).unwrap();
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_runs BEFORE INSERT ON test_results
                 BEGIN SELECT RAISE(ABORT, 'store is read-only'); END;",
            )
            .unwrap();
        let h = harness_on(store, ScriptedBrowser::new(), ScriptedReasoner::replying(DIAGNOSIS));

        let err = h.orchestrator.execute_run(TARGET).await.unwrap_err();

        assert!(matches!(err, RunnerError::Store(_)), "got {:?}", err);
        assert!(err.to_string().contains("store is read-only"));
        assert_eq!(h.browser.closes(), 1);
        assert!(h.orchestrator.store().list_recent(10).unwrap().is_empty());
    }
}
