//! Event log trait definition and read-side queries over a run's events.
//!
//! The event log is the audit trail: it decides whether execution actually
//! happened, which step was in flight when a process died, and whether a
//! decision has been answered. [`EventHistory`] holds those queries so the
//! engine and guards read the log the same way.

use std::collections::HashSet;

use phaseflow_types::decision::DecisionKind;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::event::{EventKind, NewRunEvent, RunEvent};
use uuid::Uuid;

/// Append-only, per-run event sequence.
pub trait EventLog: Send + Sync {
    /// Append an event and return it with its assigned `seq`.
    ///
    /// An append that fails must return an error, never drop silently: the
    /// engine treats a failed append as fatal to the run.
    fn append(
        &self,
        event: NewRunEvent,
    ) -> impl std::future::Future<Output = Result<RunEvent, RepositoryError>> + Send;

    /// Events with `seq > since_seq`, in ascending order.
    fn list(
        &self,
        run_id: Uuid,
        since_seq: u64,
    ) -> impl std::future::Future<Output = Result<Vec<RunEvent>, RepositoryError>> + Send;
}

// ---------------------------------------------------------------------------
// EventHistory
// ---------------------------------------------------------------------------

/// Read-only view over one run's events, in `seq` order.
#[derive(Debug, Clone, Copy)]
pub struct EventHistory<'a> {
    events: &'a [RunEvent],
}

impl<'a> EventHistory<'a> {
    pub fn new(events: &'a [RunEvent]) -> Self {
        Self { events }
    }

    pub fn has_step_start(&self) -> bool {
        self.events.iter().any(|e| e.kind == EventKind::StepStart)
    }

    /// Step ids with a `step_complete` event.
    pub fn completed_steps(&self) -> HashSet<&'a str> {
        self.events
            .iter()
            .filter(|e| e.kind == EventKind::StepComplete)
            .filter_map(|e| e.step_id.as_deref())
            .collect()
    }

    pub fn phase_completed(&self, phase: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.kind == EventKind::PhaseComplete && e.phase.as_deref() == Some(phase))
    }

    /// The step that was started but never finished: the last `step_start`
    /// with no later `step_complete` / `step_failed` for the same step.
    pub fn in_flight_step(&self) -> Option<&'a RunEvent> {
        let start = self
            .events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::StepStart)?;
        let finished = self.events.iter().any(|e| {
            e.seq > start.seq && e.kind.ends_step() && e.step_id == start.step_id
        });
        (!finished).then_some(start)
    }

    /// Whether an `approval_required` was already emitted for this decision.
    pub fn was_requested(&self, decision_id: &str) -> bool {
        self.events
            .iter()
            .any(|e| e.kind == EventKind::ApprovalRequired && e.decision_id() == Some(decision_id))
    }

    /// The latest `approval_granted` / `approval_rejected` for a decision.
    pub fn answer(&self, decision_id: &str) -> Option<&'a RunEvent> {
        self.events.iter().rev().find(|e| {
            matches!(
                e.kind,
                EventKind::ApprovalGranted | EventKind::ApprovalRejected
            ) && e.decision_id() == Some(decision_id)
        })
    }

    /// Whether a phase or destructive-operation approval was granted for
    /// this phase. Budget, review and input answers do not count.
    pub fn approval_granted_for_phase(&self, phase: &str) -> bool {
        self.events.iter().any(|e| {
            e.kind == EventKind::ApprovalGranted
                && e.phase.as_deref() == Some(phase)
                && matches!(
                    decision_kind(e),
                    Some(DecisionKind::PhaseApproval | DecisionKind::DestructiveApproval)
                )
        })
    }

    /// Number of input requests already raised by a step.
    pub fn input_requests(&self, step_id: &str) -> usize {
        self.requests_of_kind(step_id, &[DecisionKind::Input]).len()
    }

    /// Text answer to the most recent input request of a step, once answered.
    pub fn latest_input_answer(&self, step_id: &str) -> Option<String> {
        let requests = self.requests_of_kind(step_id, &[DecisionKind::Input]);
        let request = requests.last()?;
        let answer = self.answer(request.decision_id()?)?;
        if answer.kind != EventKind::ApprovalGranted {
            return None;
        }
        answer
            .payload
            .get("response")
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// A review prompt raised after the step's latest `step_start`, meaning
    /// the step already ran and only awaits a human verdict.
    pub fn pending_review(&self, step_id: &str) -> Option<&'a RunEvent> {
        let last_start = self
            .events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::StepStart && e.step_id.as_deref() == Some(step_id))?;
        self.requests_of_kind(
            step_id,
            &[DecisionKind::WarningPrompt, DecisionKind::SuccessPrompt],
        )
        .into_iter()
        .filter(|e| e.seq > last_start.seq)
        .last()
    }

    fn requests_of_kind(&self, step_id: &str, kinds: &[DecisionKind]) -> Vec<&'a RunEvent> {
        self.events
            .iter()
            .filter(|e| {
                e.kind == EventKind::ApprovalRequired
                    && e.step_id.as_deref() == Some(step_id)
                    && decision_kind(e).is_some_and(|k| kinds.contains(&k))
            })
            .collect()
    }
}

/// The `kind` recorded in an approval event's payload.
fn decision_kind(event: &RunEvent) -> Option<DecisionKind> {
    event
        .payload
        .get("kind")
        .and_then(|k| serde_json::from_value(k.clone()).ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
