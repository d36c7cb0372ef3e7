//! Job state machine

use crate::errors::{Result, TestForgeError};
use crate::model::{JobState, StageTransition};
use chrono::Utc;
use tracing::{debug, info};

/// Linear job lifecycle with a single absorbing failure state
pub struct JobStateMachine {
    current: JobState,
    history: Vec<StageTransition>,
}

impl Default for JobStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStateMachine {
    pub fn new() -> Self {
        debug!("Job state machine starts in {}", JobState::Init);
        Self { current: JobState::Init, history: Vec::new() }
    }

    pub fn current(&self) -> JobState {
        self.current
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.current, JobState::Complete | JobState::Failed)
    }

    pub fn transition_to(&mut self, to: JobState) -> Result<()> {
        self.record(to, None)
    }

    /// Enter `FAILED`; valid from every non-terminal state
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.record(JobState::Failed, Some(reason.into()))
    }

    fn record(&mut self, to: JobState, reason: Option<String>) -> Result<()> {
        if !Self::is_valid_transition(self.current, to) {
            return Err(TestForgeError::StateTransition(format!("{} -> {}", self.current, to)));
        }

        match &reason {
            Some(reason) => info!("Job {} -> {} ({})", self.current, to, reason),
            None => info!("Job {} -> {}", self.current, to),
        }

        self.history.push(StageTransition { from: self.current, to, at: Utc::now(), reason });
        self.current = to;
        Ok(())
    }

    fn is_valid_transition(from: JobState, to: JobState) -> bool {
        use JobState::*;

        match (from, to) {
            (Complete | Failed, _) => false,
            (_, Failed) => true,

            (Init, Clone) => true,
            (Clone, Analyze) => true,
            (Analyze, Generate) => true,
            (Generate, EnvHeal) => true,
            (EnvHeal, Execute) => true,
            (Execute, Refine) => true,
            (Refine, Finalize) => true,
            (Finalize, Complete) => true,

            _ => false,
        }
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    pub fn into_history(self) -> Vec<StageTransition> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut sm = JobStateMachine::new();
        for state in [
            JobState::Clone,
            JobState::Analyze,
            JobState::Generate,
            JobState::EnvHeal,
            JobState::Execute,
            JobState::Refine,
            JobState::Finalize,
            JobState::Complete,
        ] {
            sm.transition_to(state).unwrap();
        }
        assert!(sm.is_terminal());
        assert_eq!(sm.history().len(), 8);
        assert_eq!(sm.history()[0].from, JobState::Init);
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        let mut sm = JobStateMachine::new();
        assert!(sm.transition_to(JobState::Analyze).is_err());
        sm.transition_to(JobState::Clone).unwrap();
        sm.transition_to(JobState::Analyze).unwrap();
        assert!(sm.transition_to(JobState::Clone).is_err());
        assert_eq!(sm.current(), JobState::Analyze);
    }

    #[test]
    fn test_failed_is_absorbing() {
        let mut sm = JobStateMachine::new();
        sm.transition_to(JobState::Clone).unwrap();
        sm.fail("clone failed").unwrap();
        assert_eq!(sm.current(), JobState::Failed);
        assert_eq!(sm.history()[1].reason.as_deref(), Some("clone failed"));
        assert!(sm.transition_to(JobState::Analyze).is_err());
        assert!(sm.fail("again").is_err());
    }
}
