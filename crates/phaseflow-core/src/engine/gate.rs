//! Decision gates.
//!
//! Every pause in a run goes through [`Engine::gate`], keyed by a decision
//! id that is stable across resumes:
//!
//! | id                          | kind                   |
//! |-----------------------------|------------------------|
//! | `phase:{phase}`             | phase approval         |
//! | `budget:approval`           | budget approval        |
//! | `destructive:{phase}:{step}`| destructive approval   |
//! | `warning:{step}:{attempt}`  | warning review         |
//! | `success:{step}:{attempt}`  | result review          |
//! | `input:{step}:{n}`          | input request          |
//!
//! An answer already in the log is reused, so a resumed run walks through
//! gates it has passed without asking again.

use chrono::Utc;
use phaseflow_types::decision::{Decision, DecisionKind, DecisionRequest};
use phaseflow_types::event::{EventKind, NewRunEvent};
use phaseflow_types::plan::PlannedPhase;
use phaseflow_types::run::{FailureKind, RunStatus};
use serde_json::json;
use uuid::Uuid;

use crate::error::EngineError;
use crate::repository::checkpoint::CheckpointStore;
use crate::repository::event_log::{EventHistory, EventLog};
use crate::repository::plan::PlanStore;

use super::{ActiveRun, Engine};

pub(super) enum GateOutcome {
    /// Granted, with the free-text response if one was given.
    Granted(Option<String>),
    Paused,
}

pub(super) fn request(
    kind: DecisionKind,
    decision_id: String,
    question: String,
    phase: &str,
    step_id: Option<&str>,
) -> DecisionRequest {
    DecisionRequest {
        decision_id,
        kind,
        question,
        phase: Some(phase.to_string()),
        step_id: step_id.map(str::to_string),
        requested_at: Utc::now(),
    }
}

pub(super) fn phase_request(phase: &PlannedPhase) -> DecisionRequest {
    request(
        DecisionKind::PhaseApproval,
        format!("phase:{}", phase.name),
        format!(
            "Enter phase '{}' ({} step(s))?",
            phase.name,
            phase.steps.len()
        ),
        &phase.name,
        None,
    )
}

/// The `approval_granted` / `approval_rejected` event answering `request`.
pub(super) fn answer_event(run_id: Uuid, request: &DecisionRequest, decision: &Decision) -> NewRunEvent {
    let kind = if decision.is_granted() {
        EventKind::ApprovalGranted
    } else {
        EventKind::ApprovalRejected
    };
    let mut event = NewRunEvent::new(run_id, kind).payload(json!({
        "decision_id": request.decision_id,
        "kind": request.kind,
        "response": decision.response,
        "decided_by": decision.decided_by,
        "decided_at": decision.decided_at,
    }));
    if let Some(phase) = &request.phase {
        event = event.phase(phase.clone());
    }
    if let Some(step_id) = &request.step_id {
        event = event.step(step_id.clone());
    }
    event
}

impl<C, L, P> Engine<C, L, P>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    /// Resolve one decision: from the log, from the channel, or by pausing.
    ///
    /// `extra` is merged into the `approval_required` payload.
    pub(super) async fn gate(
        &self,
        run: &mut ActiveRun<'_>,
        request: DecisionRequest,
        extra: serde_json::Value,
    ) -> Result<GateOutcome, EngineError> {
        let run_id = run.state.run_id;
        let events = self.load_events(run_id).await?;
        let history = EventHistory::new(&events);

        if let Some(answer) = history.answer(&request.decision_id) {
            if answer.kind == EventKind::ApprovalGranted {
                let response = answer
                    .payload
                    .get("response")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                return Ok(GateOutcome::Granted(response));
            }
            return Err(self.rejected(run, &request).await);
        }

        if !history.was_requested(&request.decision_id) {
            let mut payload = json!({
                "decision_id": request.decision_id,
                "kind": request.kind,
                "question": request.question,
            });
            if let (Some(target), serde_json::Value::Object(fields)) = (payload.as_object_mut(), extra) {
                target.extend(fields);
            }
            let mut event = NewRunEvent::new(run_id, EventKind::ApprovalRequired).payload(payload);
            if let Some(phase) = &request.phase {
                event = event.phase(phase.clone());
            }
            if let Some(step_id) = &request.step_id {
                event = event.step(step_id.clone());
            }
            self.emit(&mut run.state, event).await?;
        }

        if let Some(channel) = &self.channel {
            let answer = tokio::select! {
                biased;
                _ = run.token.cancelled() => return Err(EngineError::Aborted { run_id }),
                _ = self.watch_for_abort(run) => return Err(EngineError::Aborted { run_id }),
                answer = channel.await_decision(&request) => answer,
            };
            match answer {
                Ok(decision) => {
                    self.emit(&mut run.state, answer_event(run_id, &request, &decision))
                        .await?;
                    if decision.is_granted() {
                        return Ok(GateOutcome::Granted(decision.response));
                    }
                    return Err(self.rejected(run, &request).await);
                }
                Err(err) => {
                    tracing::info!(
                        run_id = %run_id,
                        decision_id = request.decision_id.as_str(),
                        reason = %err,
                        "decision not answered inline, pausing"
                    );
                }
            }
        }

        let decision_id = request.decision_id.clone();
        let kind = request.kind;
        run.state.status = RunStatus::Paused;
        run.state.pending_decision = Some(request);
        self.persist(&mut run.state).await?;
        self.emit(
            &mut run.state,
            NewRunEvent::new(run_id, EventKind::WorkflowPaused).payload(json!({
                "decision_id": decision_id,
                "kind": kind,
            })),
        )
        .await?;

        tracing::info!(run_id = %run_id, decision_id = decision_id.as_str(), "run paused for decision");
        Ok(GateOutcome::Paused)
    }

    async fn rejected(&self, run: &mut ActiveRun<'_>, request: &DecisionRequest) -> EngineError {
        let run_id = run.state.run_id;
        let mut event = NewRunEvent::new(run_id, EventKind::WorkflowFailed).payload(json!({
            "kind": FailureKind::ApprovalRejected,
            "reason": "approval_rejected",
            "decision_id": request.decision_id,
        }));
        if let Some(phase) = &request.phase {
            event = event.phase(phase.clone());
        }
        let err = EngineError::ApprovalRejected {
            run_id,
            decision_id: request.decision_id.clone(),
        };
        self.fail_run(
            run,
            FailureKind::ApprovalRejected,
            format!("decision '{}' was rejected", request.decision_id),
            (request.phase.as_deref(), request.step_id.as_deref()),
            event,
            err,
        )
        .await
    }
}
