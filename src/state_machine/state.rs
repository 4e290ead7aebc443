use std::fmt;

use serde::{Deserialize, Serialize};

use super::job::{Job, JobFailure};

/// Lifecycle states of a summarization job.
///
/// Each job flows through: QUEUED → TRIAGING → MAPPING → REDUCING → STORING → COMPLETE,
/// with ERROR reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Triaging,
    Mapping,
    Reducing,
    Storing,
    Complete,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Error)
    }

    /// The state that follows this one on the success path.
    pub fn successor(self) -> Option<JobState> {
        match self {
            JobState::Queued => Some(JobState::Triaging),
            JobState::Triaging => Some(JobState::Mapping),
            JobState::Mapping => Some(JobState::Reducing),
            JobState::Reducing => Some(JobState::Storing),
            JobState::Storing => Some(JobState::Complete),
            JobState::Complete | JobState::Error => None,
        }
    }

    /// Progress fraction reported when a job enters this state.
    pub fn entry_progress(self) -> f64 {
        match self {
            JobState::Queued => 0.0,
            JobState::Triaging => 0.05,
            JobState::Mapping => 0.15,
            JobState::Reducing => 0.85,
            JobState::Storing => 0.95,
            JobState::Complete => 1.0,
            JobState::Error => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Triaging => "triaging",
            JobState::Mapping => "mapping",
            JobState::Reducing => "reducing",
            JobState::Storing => "storing",
            JobState::Complete => "complete",
            JobState::Error => "error",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of asking the state machine to move a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The job advanced to the given state.
    Next(JobState),
    /// The job entered `Error` while in the recorded stage.
    Failed(JobFailure),
    /// The job was already terminal; nothing changed.
    Rejected { state: JobState },
}

/// Drives a `Job` through its lifecycle. Stages are never skipped.
pub struct StateMachine;

impl StateMachine {
    /// Move the job to the next stage on the success path.
    pub fn advance(job: &mut Job) -> Transition {
        let Some(next) = job.state.successor() else {
            return Transition::Rejected { state: job.state };
        };
        Self::enter(job, next);
        Transition::Next(next)
    }

    /// Move the job to `Error`, recording the active stage and the cause.
    ///
    /// Partial chunk results and any reduced output are discarded; the
    /// failure stays on the job for inspection.
    pub fn fail(job: &mut Job, cause: impl fmt::Display) -> Transition {
        if job.state.is_terminal() {
            return Transition::Rejected { state: job.state };
        }
        let failure = JobFailure {
            stage: job.state,
            cause: cause.to_string(),
        };
        job.chunk_results.clear();
        job.summary = None;
        job.report = None;
        job.failure = Some(failure.clone());
        Self::enter(job, JobState::Error);
        Transition::Failed(failure)
    }

    fn enter(job: &mut Job, next: JobState) {
        job.state_history.push(job.state);
        job.state = next;
        job.updated_at = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::job::{ChunkResult, Strategy};
    use crate::tier::Tier;

    fn make_job() -> Job {
        Job::new("doc-1".to_string(), Strategy::Balanced)
    }

    #[test]
    fn happy_path_walks_all_states() {
        let mut job = make_job();
        assert_eq!(job.state, JobState::Queued);

        for expected in [
            JobState::Triaging,
            JobState::Mapping,
            JobState::Reducing,
            JobState::Storing,
            JobState::Complete,
        ] {
            assert_eq!(StateMachine::advance(&mut job), Transition::Next(expected));
            assert_eq!(job.state, expected);
        }

        // Complete is terminal.
        assert_eq!(
            StateMachine::advance(&mut job),
            Transition::Rejected {
                state: JobState::Complete
            }
        );
        assert_eq!(job.state, JobState::Complete);
    }

    #[test]
    fn state_history_is_recorded() {
        let mut job = make_job();
        StateMachine::advance(&mut job);
        StateMachine::advance(&mut job);
        StateMachine::advance(&mut job);

        assert_eq!(
            job.state_history,
            vec![JobState::Queued, JobState::Triaging, JobState::Mapping]
        );
    }

    #[test]
    fn failure_records_stage_and_discards_partials() {
        let mut job = make_job();
        StateMachine::advance(&mut job);
        StateMachine::advance(&mut job);
        job.chunk_results.push(ChunkResult {
            chunk_index: 0,
            summary: "partial".into(),
            tier: Tier::Light,
            initial_tier: Tier::Light,
            escalations: 0,
            confidence: 0.9,
            carbon_grams: 0.01,
            chars_processed: 40,
            source_tokens: 10,
        });

        let t = StateMachine::fail(&mut job, "medium model unavailable: 503");
        let Transition::Failed(failure) = t else {
            panic!("expected Failed transition");
        };
        assert_eq!(failure.stage, JobState::Mapping);
        assert_eq!(failure.cause, "medium model unavailable: 503");
        assert_eq!(job.state, JobState::Error);
        assert!(job.chunk_results.is_empty());
        assert!(job.summary.is_none());
        assert!(job.report.is_none());
        assert_eq!(job.failure, Some(failure));
    }

    #[test]
    fn error_is_terminal() {
        let mut job = make_job();
        StateMachine::fail(&mut job, "cancelled");
        assert_eq!(
            StateMachine::advance(&mut job),
            Transition::Rejected {
                state: JobState::Error
            }
        );
        assert_eq!(
            StateMachine::fail(&mut job, "again"),
            Transition::Rejected {
                state: JobState::Error
            }
        );
        assert_eq!(job.failure.as_ref().unwrap().cause, "cancelled");
        assert_eq!(job.failure.as_ref().unwrap().stage, JobState::Queued);
    }

    #[test]
    fn state_display() {
        assert_eq!(JobState::Queued.to_string(), "queued");
        assert_eq!(JobState::Mapping.to_string(), "mapping");
        assert_eq!(JobState::Complete.to_string(), "complete");
        assert_eq!(JobState::Error.to_string(), "error");
    }

    #[test]
    fn entry_progress_is_monotonic_on_success_path() {
        let mut state = JobState::Queued;
        while let Some(next) = state.successor() {
            assert!(next.entry_progress() > state.entry_progress());
            state = next;
        }
        assert_eq!(state, JobState::Complete);
    }
}
