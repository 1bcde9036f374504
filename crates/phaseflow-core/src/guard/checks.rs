//! The four mandatory guards.

use phaseflow_types::plan::PlannedStep;

use crate::repository::event_log::EventHistory;

use super::{Guard, GuardContext, GuardPoint, GuardVerdict};

// ---------------------------------------------------------------------------
// Execution Evidence
// ---------------------------------------------------------------------------

/// Refuses completion when the log holds no `step_start` at all.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionEvidenceGuard;

impl ExecutionEvidenceGuard {
    pub const NAME: &'static str = "execution_evidence";
}

impl Guard for ExecutionEvidenceGuard {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applies(&self, point: GuardPoint, _step: Option<&PlannedStep>) -> bool {
        point == GuardPoint::BeforeCompletion
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        if EventHistory::new(ctx.events).has_step_start() {
            GuardVerdict::Pass
        } else {
            GuardVerdict::Fail("no step_start event exists for this run".into())
        }
    }
}

// ---------------------------------------------------------------------------
// State Consistency
// ---------------------------------------------------------------------------

/// Refuses completion while every phase is still `pending`.
#[derive(Debug, Clone, Copy)]
pub struct StateConsistencyGuard;

impl StateConsistencyGuard {
    pub const NAME: &'static str = "state_consistency";
}

impl Guard for StateConsistencyGuard {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applies(&self, point: GuardPoint, _step: Option<&PlannedStep>) -> bool {
        point == GuardPoint::BeforeCompletion
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        if ctx.state.all_phases_pending() {
            GuardVerdict::Fail("every phase is still pending".into())
        } else {
            GuardVerdict::Pass
        }
    }
}

// ---------------------------------------------------------------------------
// Branch Safety
// ---------------------------------------------------------------------------

/// Refuses version-control writes on a protected or undeterminable branch.
#[derive(Debug, Clone, Copy)]
pub struct BranchSafetyGuard;

impl BranchSafetyGuard {
    pub const NAME: &'static str = "branch_safety";
}

impl Guard for BranchSafetyGuard {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applies(&self, point: GuardPoint, step: Option<&PlannedStep>) -> bool {
        point == GuardPoint::BeforeStep && step.is_some_and(PlannedStep::touches_vcs)
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        match ctx.branch {
            None => GuardVerdict::Fail("current branch could not be determined".into()),
            Some(branch) if ctx.protected_branches.iter().any(|p| p == branch) => {
                GuardVerdict::Fail(format!("branch '{branch}' is protected"))
            }
            Some(_) => GuardVerdict::Pass,
        }
    }
}

// ---------------------------------------------------------------------------
// Destructive-Operation Approval
// ---------------------------------------------------------------------------

/// Refuses merge/delete/close steps without an `approval_granted` for the
/// step's phase.
#[derive(Debug, Clone, Copy)]
pub struct DestructiveApprovalGuard;

impl DestructiveApprovalGuard {
    pub const NAME: &'static str = "destructive_approval";
}

impl Guard for DestructiveApprovalGuard {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn applies(&self, point: GuardPoint, step: Option<&PlannedStep>) -> bool {
        point == GuardPoint::BeforeStep && step.is_some_and(PlannedStep::is_destructive)
    }

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict {
        let Some(phase) = ctx.phase else {
            return GuardVerdict::Fail("destructive step outside of a phase".into());
        };
        if EventHistory::new(ctx.events).approval_granted_for_phase(phase) {
            GuardVerdict::Pass
        } else {
            GuardVerdict::Fail(format!(
                "no approval_granted event for phase '{phase}'"
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use phaseflow_types::budget::BudgetLedger;
    use phaseflow_types::event::{EventKind, NewRunEvent, RunEvent};
    use phaseflow_types::run::{PhaseStatus, RunState};
    use phaseflow_types::workflow::StepEffect;

    use crate::guard::{GuardFailure, GuardSet};
    use crate::testing::{plan_with, step};

    use super::*;

    fn state() -> RunState {
        let plan = plan_with(vec![("build", vec![step("implement")], false, 1)]);
        RunState::new(&plan, BudgetLedger::default())
    }

    fn ctx<'a>(
        state: &'a RunState,
        events: &'a [RunEvent],
        step: Option<&'a PlannedStep>,
        branch: Option<&'a str>,
        protected: &'a [String],
    ) -> GuardContext<'a> {
        GuardContext {
            state,
            events,
            phase: Some("release"),
            step,
            branch,
            protected_branches: protected,
        }
    }

    #[test]
    fn completion_without_evidence_fails_evidence_first() {
        let state = state();
        let protected: Vec<String> = Vec::new();
        let failure = GuardSet::standard()
            .check(
                GuardPoint::BeforeCompletion,
                &ctx(&state, &[], None, None, &protected),
            )
            .unwrap_err();
        assert_eq!(failure.guard, ExecutionEvidenceGuard::NAME);
    }

    #[test]
    fn completion_with_all_phases_pending_fails_consistency() {
        let state = state();
        let events = vec![
            NewRunEvent::new(state.run_id, EventKind::StepStart)
                .step("implement")
                .sequenced(1),
        ];
        let protected: Vec<String> = Vec::new();
        let failure = GuardSet::standard()
            .check(
                GuardPoint::BeforeCompletion,
                &ctx(&state, &events, None, None, &protected),
            )
            .unwrap_err();
        assert_eq!(failure.guard, StateConsistencyGuard::NAME);

        let mut progressed = state.clone();
        progressed.phases[0].status = PhaseStatus::Completed;
        assert!(GuardSet::standard()
            .check(
                GuardPoint::BeforeCompletion,
                &ctx(&progressed, &events, None, None, &protected),
            )
            .is_ok());
    }

    #[test]
    fn branch_safety_blocks_protected_and_unknown() {
        let state = state();
        let mut commit = step("commit");
        commit.effects.insert(StepEffect::Commit);
        let protected = vec!["main".to_string()];

        let on_main = ctx(&state, &[], Some(&commit), Some("main"), &protected);
        assert_eq!(
            BranchSafetyGuard.check(&on_main),
            GuardVerdict::Fail("branch 'main' is protected".into())
        );

        let unknown = ctx(&state, &[], Some(&commit), None, &protected);
        assert!(matches!(BranchSafetyGuard.check(&unknown), GuardVerdict::Fail(_)));

        let feature = ctx(&state, &[], Some(&commit), Some("feature/x"), &protected);
        assert_eq!(BranchSafetyGuard.check(&feature), GuardVerdict::Pass);
    }

    #[test]
    fn branch_safety_ignores_steps_without_vcs_effects() {
        let plain = step("plain");
        assert!(!BranchSafetyGuard.applies(GuardPoint::BeforeStep, Some(&plain)));
        assert!(!GuardSet::standard().needs_branch(&plain));

        let mut merge = step("merge");
        merge.effects.insert(StepEffect::Merge);
        assert!(GuardSet::standard().needs_branch(&merge));
    }

    #[test]
    fn destructive_requires_phase_approval() {
        let state = state();
        let mut close = step("close");
        close.effects.insert(StepEffect::Close);
        let protected: Vec<String> = Vec::new();

        let failure: GuardFailure = GuardSet::standard()
            .check(
                GuardPoint::BeforeStep,
                &ctx(&state, &[], Some(&close), None, &protected),
            )
            .unwrap_err();
        assert_eq!(failure.guard, DestructiveApprovalGuard::NAME);

        let wrong_phase = vec![
            NewRunEvent::new(Uuid::now_v7(), EventKind::ApprovalGranted)
                .phase("build")
                .payload(json!({"decision_id": "phase:build", "kind": "phase_approval"}))
                .sequenced(1),
        ];
        assert!(matches!(
            DestructiveApprovalGuard.check(&ctx(&state, &wrong_phase, Some(&close), None, &protected)),
            GuardVerdict::Fail(_)
        ));

        let granted = vec![
            NewRunEvent::new(state.run_id, EventKind::ApprovalGranted)
                .phase("release")
                .payload(json!({"decision_id": "destructive:release:close", "kind": "destructive_approval"}))
                .sequenced(1),
        ];
        assert_eq!(
            DestructiveApprovalGuard.check(&ctx(&state, &granted, Some(&close), None, &protected)),
            GuardVerdict::Pass
        );
    }
}
