//! Run lifecycle state machine
//!
//! ```text
//!            Start                 StepSucceeded (i < last)
//! Pending ─────────▶ Running(0) ──────────────▶ Running(i + 1)
//!                        │
//!                        ├── StepSucceeded (i == last) ──▶ Completed
//!                        └── StepFailed ─────────────────▶ Failed
//! ```
//!
//! `Completed` and `Failed` are terminal.

use vidprobe_common::{Error, Result, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running(usize),
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Start,
    StepSucceeded,
    StepFailed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running(i) => write!(f, "running({})", i),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

impl RunState {
    /// Apply `event` to a run of `step_count` steps.
    pub fn transition(self, event: RunEvent, step_count: usize) -> Result<RunState> {
        let next = match (self, event) {
            (RunState::Pending, RunEvent::Start) if step_count > 0 => RunState::Running(0),
            (RunState::Running(i), RunEvent::StepSucceeded) if i + 1 < step_count => {
                RunState::Running(i + 1)
            }
            (RunState::Running(i), RunEvent::StepSucceeded) if i + 1 == step_count => {
                RunState::Completed
            }
            (RunState::Running(_), RunEvent::StepFailed) => RunState::Failed,
            (from, event) => {
                return Err(Error::InvalidStateTransition {
                    from: from.to_string(),
                    to: format!("{:?}", event),
                })
            }
        };
        Ok(next)
    }

    /// Final status for a terminal state
    pub fn final_status(&self) -> Option<RunStatus> {
        match self {
            RunState::Completed => Some(RunStatus::Success),
            RunState::Failed => Some(RunStatus::Failed),
            _ => None,
        }
    }

    /// Index of the step currently executing
    pub fn step_index(&self) -> Option<usize> {
        match self {
            RunState::Running(i) => Some(*i),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_walks_every_step() {
        let mut state = RunState::Pending.transition(RunEvent::Start, 3).unwrap();
        assert_eq!(state, RunState::Running(0));

        state = state.transition(RunEvent::StepSucceeded, 3).unwrap();
        assert_eq!(state, RunState::Running(1));
        state = state.transition(RunEvent::StepSucceeded, 3).unwrap();
        assert_eq!(state, RunState::Running(2));
        state = state.transition(RunEvent::StepSucceeded, 3).unwrap();

        assert_eq!(state, RunState::Completed);
        assert_eq!(state.final_status(), Some(RunStatus::Success));
    }

    #[test]
    fn test_failure_is_terminal_from_any_step() {
        for i in 0..3 {
            let state = RunState::Running(i).transition(RunEvent::StepFailed, 3).unwrap();
            assert_eq!(state, RunState::Failed);
            assert_eq!(state.final_status(), Some(RunStatus::Failed));
        }
    }

    #[test]
    fn test_terminal_states_reject_events() {
        for state in [RunState::Completed, RunState::Failed] {
            for event in [RunEvent::Start, RunEvent::StepSucceeded, RunEvent::StepFailed] {
                let err = state.transition(event, 3).unwrap_err();
                assert!(matches!(err, Error::InvalidStateTransition { .. }));
            }
        }
    }

    #[test]
    fn test_pending_only_accepts_start() {
        assert!(RunState::Pending.transition(RunEvent::StepSucceeded, 3).is_err());
        assert!(RunState::Pending.transition(RunEvent::StepFailed, 3).is_err());
        assert!(RunState::Pending.transition(RunEvent::Start, 0).is_err());
        assert!(RunState::Running(0).transition(RunEvent::Start, 3).is_err());
    }

    #[test]
    fn test_single_step_run_completes_immediately() {
        let state = RunState::Pending.transition(RunEvent::Start, 1).unwrap();
        assert_eq!(state.transition(RunEvent::StepSucceeded, 1).unwrap(), RunState::Completed);
    }
}
