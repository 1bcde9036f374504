//! Run state: the mutable, versioned progress record for one plan execution.
//!
//! Exactly one `RunState` exists per run id. The engine mutates it and
//! persists every change through a compare-and-swap on `version`, so a stale
//! writer can never overwrite newer progress.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::BudgetLedger;
use crate::decision::DecisionRequest;
use crate::plan::ExecutionPlan;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Why a run ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Guard,
    StepExecution,
    BudgetExceeded,
    UserAborted,
    ApprovalRejected,
    Internal,
}

impl FailureKind {
    /// Failures that an explicit resume may not restart.
    pub fn is_resumable(self) -> bool {
        !matches!(
            self,
            Self::BudgetExceeded | Self::UserAborted | Self::ApprovalRejected
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guard => write!(f, "guard"),
            Self::StepExecution => write!(f, "step_execution"),
            Self::BudgetExceeded => write!(f, "budget_exceeded"),
            Self::UserAborted => write!(f, "user_aborted"),
            Self::ApprovalRejected => write!(f, "approval_rejected"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub plan_id: Uuid,
    /// Compare-and-swap counter. Starts at 1 and increments on every write.
    pub version: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    pub phases: Vec<PhaseProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_decision: Option<DecisionRequest>,
    pub budget: BudgetLedger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    /// Fresh `pending` state mirroring the plan's phase/step layout.
    pub fn new(plan: &ExecutionPlan, budget: BudgetLedger) -> Self {
        let now = Utc::now();
        let phases = plan
            .phases
            .iter()
            .map(|phase| PhaseProgress {
                name: phase.name.clone(),
                status: PhaseStatus::Pending,
                retries_used: 0,
                steps: phase
                    .steps
                    .iter()
                    .map(|s| StepProgress {
                        step_id: s.id.clone(),
                        status: StepStatus::Pending,
                        attempts: 0,
                    })
                    .collect(),
            })
            .collect();

        Self {
            run_id: plan.run_id,
            plan_id: plan.plan_id,
            version: 1,
            status: RunStatus::Pending,
            current_phase: None,
            current_step: None,
            phases,
            pending_decision: None,
            budget,
            failure: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseProgress> {
        self.phases.iter().find(|p| p.name == name)
    }

    pub fn phase_mut(&mut self, name: &str) -> Option<&mut PhaseProgress> {
        self.phases.iter_mut().find(|p| p.name == name)
    }

    pub fn step(&self, phase: &str, step_id: &str) -> Option<&StepProgress> {
        self.phase(phase)
            .and_then(|p| p.steps.iter().find(|s| s.step_id == step_id))
    }

    pub fn step_mut(&mut self, phase: &str, step_id: &str) -> Option<&mut StepProgress> {
        self.phase_mut(phase)
            .and_then(|p| p.steps.iter_mut().find(|s| s.step_id == step_id))
    }

    /// True when no phase has left `pending`.
    pub fn all_phases_pending(&self) -> bool {
        self.phases.iter().all(|p| p.status == PhaseStatus::Pending)
    }

    pub fn completed_steps(&self) -> usize {
        self.phases
            .iter()
            .flat_map(|p| p.steps.iter())
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn total_steps(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    pub fn is_aborted(&self) -> bool {
        self.status == RunStatus::Failed
            && self
                .failure
                .as_ref()
                .is_some_and(|f| f.kind == FailureKind::UserAborted)
    }

    /// Transition to `failed` with a recorded reason.
    pub fn fail(&mut self, kind: FailureKind, reason: impl Into<String>, step_id: Option<String>) {
        let now = Utc::now();
        self.status = RunStatus::Failed;
        self.failure = Some(RunFailure {
            kind,
            reason: reason.into(),
            step_id,
        });
        self.pending_decision = None;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub name: String,
    pub status: PhaseStatus,
    /// Retries consumed by any step of this phase. Durable across resumes.
    pub retries_used: u32,
    pub steps: Vec<StepProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProgress {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{AutonomyLevel, PlannedPhase, PlannedStep, StepPayload, WorkReference};
    use crate::workflow::ResultHandling;

    fn plan() -> ExecutionPlan {
        let step = |id: &str| PlannedStep {
            id: id.into(),
            name: id.into(),
            prompt: "do it".into(),
            context: None,
            payload: StepPayload::FreeformInstruction {
                text: "do it".into(),
                context: None,
            },
            arguments: Default::default(),
            effects: Default::default(),
            result_handling: ResultHandling::default(),
            origin: "standard".into(),
        };
        ExecutionPlan {
            plan_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            work_reference: WorkReference::None,
            workflow_id: "standard".into(),
            workflow_version: "1.0.0".into(),
            inheritance_chain: vec!["standard".into()],
            autonomy_level: AutonomyLevel::Supervised,
            phases: vec![
                PlannedPhase {
                    name: "build".into(),
                    steps: vec![step("implement"), step("test")],
                    requires_approval: false,
                    max_retries: 2,
                },
                PlannedPhase {
                    name: "release".into(),
                    steps: vec![step("merge")],
                    requires_approval: true,
                    max_retries: 0,
                },
            ],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn new_state_mirrors_plan() {
        let plan = plan();
        let state = RunState::new(&plan, BudgetLedger::default());
        assert_eq!(state.run_id, plan.run_id);
        assert_eq!(state.version, 1);
        assert_eq!(state.status, RunStatus::Pending);
        assert_eq!(state.total_steps(), 3);
        assert!(state.all_phases_pending());
        assert_eq!(
            state.step("build", "test").map(|s| s.status),
            Some(StepStatus::Pending)
        );
    }

    #[test]
    fn fail_records_reason_and_clears_decision() {
        let mut state = RunState::new(&plan(), BudgetLedger::default());
        state.fail(FailureKind::UserAborted, "user_aborted", None);
        assert!(state.is_aborted());
        assert!(state.status.is_terminal());
        assert!(state.finished_at.is_some());
        assert!(!FailureKind::UserAborted.is_resumable());
        assert!(FailureKind::StepExecution.is_resumable());
    }

    #[test]
    fn step_mut_updates_progress() {
        let mut state = RunState::new(&plan(), BudgetLedger::default());
        state.step_mut("build", "implement").unwrap().status = StepStatus::Completed;
        assert_eq!(state.completed_steps(), 1);
        assert!(state.step_mut("build", "missing").is_none());
    }
}
