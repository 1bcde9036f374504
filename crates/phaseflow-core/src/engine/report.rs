//! What a caller gets back from driving a run.

use phaseflow_types::decision::DecisionRequest;
use phaseflow_types::run::{RunFailure, RunState, RunStatus};
use serde::Serialize;
use uuid::Uuid;

/// Summary of a run after the engine returned control.
///
/// A `paused` report carries the decision the run is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_decision: Option<DecisionRequest>,
    pub completed_steps: usize,
    pub total_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl RunReport {
    pub fn from_state(state: &RunState) -> Self {
        Self {
            run_id: state.run_id,
            status: state.status,
            current_phase: state.current_phase.clone(),
            pending_decision: state.pending_decision.clone(),
            completed_steps: state.completed_steps(),
            total_steps: state.total_steps(),
            failure: state.failure.clone(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }
}
