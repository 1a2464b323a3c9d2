//! Finite State Machine for deployment jobs

use serde::{Deserialize, Serialize};

use crate::models::job::JobState;

/// Job event, produced by the pipeline from executor outcomes
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Context is ready and the compose spec parsed
    Validated,

    /// Network prune finished (or had nothing to prune)
    Pruned,

    /// Compose bring-up succeeded
    BroughtUp { has_file_updates: bool },

    /// All file updates were pushed
    FilesPushed,

    /// Stats stage finished, successfully or downgraded to a warning
    StatsGathered,

    /// Context is ready for a file-update job
    UpdatesAccepted,

    /// Every update of a file-update job was pushed
    UpdatesApplied,

    /// Current stage failed
    Fail(String),

    /// Cancellation took effect at a stage boundary
    Cancel,
}

/// Job FSM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFsm {
    state: JobState,

    /// Every state entered, in order, starting with `Received`
    history: Vec<JobState>,
}

impl JobFsm {
    /// Create a new FSM in received state
    pub fn new() -> Self {
        Self {
            state: JobState::Received,
            history: vec![JobState::Received],
        }
    }

    /// Get current state
    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// States visited so far
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: JobEvent) -> Result<&JobState, String> {
        let new_state = match (&self.state, event) {
            (JobState::Received, JobEvent::Validated) => JobState::NetworkPruned,
            (JobState::NetworkPruned, JobEvent::Pruned) => JobState::Deploying,
            (JobState::Deploying, JobEvent::BroughtUp { has_file_updates: true }) => {
                JobState::FilesUpdated
            }
            (JobState::Deploying, JobEvent::BroughtUp { has_file_updates: false }) => {
                JobState::StatsCollected
            }
            (JobState::FilesUpdated, JobEvent::FilesPushed) => JobState::StatsCollected,
            (JobState::StatsCollected, JobEvent::StatsGathered) => JobState::Succeeded,

            // File-update jobs skip prune, bring-up and stats
            (JobState::Received, JobEvent::UpdatesAccepted) => JobState::FilesUpdated,
            (JobState::FilesUpdated, JobEvent::UpdatesApplied) => JobState::Succeeded,

            // Failure and cancellation are reachable from any non-terminal state
            (state, JobEvent::Fail(reason)) if !state.is_terminal() => JobState::Failed {
                stage: state.stage().unwrap_or(crate::models::job::Stage::Received),
                reason,
            },
            (state, JobEvent::Cancel) if !state.is_terminal() => JobState::Cancelled,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.history.push(new_state.clone());
        self.state = new_state;
        Ok(&self.state)
    }
}

impl Default for JobFsm {
    fn default() -> Self {
        Self::new()
    }
}
