//! Engine error taxonomy.
//!
//! Pauses are not errors: a paused run comes back as an `Ok(RunReport)`.
//! Everything here either rejects input up front (validation) or reports a
//! run that ended in `failed`.

use phaseflow_types::error::{DefinitionError, RepositoryError};
use phaseflow_types::run::RunStatus;
use uuid::Uuid;

use crate::decision::DecisionError;

/// Process exit codes shared by the CLI.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_BUDGET_EXCEEDED: i32 = 2;
pub const EXIT_ABORTED: i32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("cyclic workflow inheritance: {}", .0.join(" -> "))]
    CyclicInheritance(Vec<String>),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("run {run_id}: guard '{guard}' failed: {reason}")]
    GuardFailure {
        run_id: Uuid,
        guard: String,
        reason: String,
    },

    #[error("run {run_id}: step '{step_id}' failed: {message}")]
    StepExecution {
        run_id: Uuid,
        step_id: String,
        message: String,
    },

    #[error("run {run_id}: budget exceeded ({consumed} of {ceiling} units)")]
    BudgetExceeded {
        run_id: Uuid,
        consumed: u64,
        ceiling: u64,
    },

    /// Another writer advanced the run's state first. This engine instance
    /// stopped without applying its update.
    #[error("run {run_id}: concurrent update detected, state was not overwritten")]
    ConcurrencyConflict { run_id: Uuid },

    #[error("run {run_id} was aborted (user_aborted)")]
    Aborted { run_id: Uuid },

    #[error("run {run_id}: decision '{decision_id}' was rejected")]
    ApprovalRejected { run_id: Uuid, decision_id: String },

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("no plan stored for run {0}")]
    PlanNotFound(Uuid),

    #[error("run {run_id} is {status}: {reason}")]
    InvalidTransition {
        run_id: Uuid,
        status: RunStatus,
        reason: String,
    },

    #[error("run {run_id} has no pending decision '{decision_id}'")]
    UnknownDecision { run_id: Uuid, decision_id: String },

    #[error("event log append failed for run {run_id}: {reason}")]
    EventLog { run_id: Uuid, reason: String },

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("decision channel error: {0}")]
    Decision(#[from] DecisionError),
}

impl From<DefinitionError> for EngineError {
    fn from(err: DefinitionError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl EngineError {
    /// CLI exit code: 2 for budget, 3 for abort, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BudgetExceeded { .. } => EXIT_BUDGET_EXCEEDED,
            Self::Aborted { .. } => EXIT_ABORTED,
            _ => EXIT_FAILURE,
        }
    }

    /// The run this error belongs to, when there is one.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            Self::GuardFailure { run_id, .. }
            | Self::StepExecution { run_id, .. }
            | Self::BudgetExceeded { run_id, .. }
            | Self::ConcurrencyConflict { run_id }
            | Self::Aborted { run_id }
            | Self::ApprovalRejected { run_id, .. }
            | Self::InvalidTransition { run_id, .. }
            | Self::UnknownDecision { run_id, .. }
            | Self::EventLog { run_id, .. } => Some(*run_id),
            Self::RunNotFound(run_id) | Self::PlanNotFound(run_id) => Some(*run_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let run_id = Uuid::now_v7();
        assert_eq!(
            EngineError::BudgetExceeded {
                run_id,
                consumed: 10,
                ceiling: 10
            }
            .exit_code(),
            2
        );
        assert_eq!(EngineError::Aborted { run_id }.exit_code(), 3);
        assert_eq!(EngineError::Validation("bad".into()).exit_code(), 1);
        assert_eq!(
            EngineError::GuardFailure {
                run_id,
                guard: "branch_safety".into(),
                reason: "main is protected".into()
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn cycle_display_shows_chain() {
        let err = EngineError::CyclicInheritance(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "cyclic workflow inheritance: a -> b -> a");
        assert!(err.run_id().is_none());
    }

    #[test]
    fn guard_failure_names_run_and_guard() {
        let run_id = Uuid::now_v7();
        let err = EngineError::GuardFailure {
            run_id,
            guard: "execution_evidence".into(),
            reason: "no step_start event".into(),
        };
        let text = err.to_string();
        assert!(text.contains(&run_id.to_string()));
        assert!(text.contains("execution_evidence"));
        assert_eq!(err.run_id(), Some(run_id));
    }
}
