//! Per-step protocol: gates, guards, dispatch, retry and outcome handling.

use phaseflow_types::decision::DecisionKind;
use phaseflow_types::event::{EventKind, NewRunEvent, RunEvent};
use phaseflow_types::plan::{PlannedPhase, PlannedStep};
use phaseflow_types::run::{FailureKind, StepStatus};
use phaseflow_types::step::{StepOutcome, StepResult};
use phaseflow_types::workflow::{OutcomeAction, StepEffect};
use serde_json::json;

use crate::budget::{BudgetAssessment, BudgetTracker};
use crate::error::EngineError;
use crate::executor::{StepExecutorError, StepRequest};
use crate::guard::{GuardContext, GuardPoint};
use crate::repository::checkpoint::CheckpointStore;
use crate::repository::event_log::{EventHistory, EventLog};
use crate::repository::plan::PlanStore;

use super::gate::{self, GateOutcome};
use super::{ActiveRun, Engine, Flow, missing_progress};

impl<C, L, P> Engine<C, L, P>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    pub(super) async fn run_step(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
    ) -> Result<Flow, EngineError> {
        let run_id = run.state.run_id;
        let events = self.load_events(run_id).await?;
        let history = EventHistory::new(&events);

        // A step that already ran and only awaits a review verdict is not
        // dispatched again.
        let in_progress = run
            .state
            .step(&phase.name, &step.id)
            .is_some_and(|s| s.status == StepStatus::InProgress);
        if in_progress {
            if let Some(review) = history.pending_review(&step.id) {
                let review = review.clone();
                return self.resolve_review(run, phase, step, &review).await;
            }
        }

        if step.is_destructive() && !history.approval_granted_for_phase(&phase.name) {
            let effects: Vec<String> = step
                .effects
                .iter()
                .filter(|e| e.is_destructive())
                .map(|e| format!("{e:?}").to_lowercase())
                .collect();
            let request = gate::request(
                DecisionKind::DestructiveApproval,
                format!("destructive:{}:{}", phase.name, step.id),
                format!(
                    "Step '{}' will {}. Proceed?",
                    step.name,
                    effects.join(" and ")
                ),
                &phase.name,
                Some(&step.id),
            );
            if let GateOutcome::Paused = self.gate(run, request, json!({ "effects": effects })).await? {
                return Ok(Flow::Paused);
            }
        }

        if step.has_effect(StepEffect::CostBearing) {
            if let Flow::Paused = self.budget_gate(run, phase, step).await? {
                return Ok(Flow::Paused);
            }
        }

        self.check_before_step(run, phase, step).await?;

        let attempt = {
            let progress = run
                .state
                .step_mut(&phase.name, &step.id)
                .ok_or_else(|| missing_progress(&step.id))?;
            progress.status = StepStatus::InProgress;
            progress.attempts += 1;
            progress.attempts
        };
        run.state.current_phase = Some(phase.name.clone());
        run.state.current_step = Some(step.id.clone());
        self.persist(&mut run.state).await?;
        self.emit(
            &mut run.state,
            NewRunEvent::new(run_id, EventKind::StepStart)
                .phase(phase.name.clone())
                .step(step.id.clone())
                .payload(json!({
                    "name": step.name,
                    "attempt": attempt,
                    "named_operation": step.payload.is_named_operation(),
                })),
        )
        .await?;

        tracing::debug!(
            run_id = %run_id,
            phase = phase.name.as_str(),
            step_id = step.id.as_str(),
            attempt,
            "dispatching step"
        );

        let mut input = history.latest_input_answer(&step.id);
        loop {
            let result = self.dispatch(run, phase, step, input.take()).await?;

            if let Some(units) = result.cost_units {
                if let BudgetAssessment::Exceeded { consumed, ceiling } =
                    BudgetTracker::record(&mut run.state.budget, units)
                {
                    return Err(self.budget_exceeded(run, phase, step, consumed, ceiling).await);
                }
            }
            self.check_cancelled(run)?;

            match result.status {
                StepOutcome::Success => {
                    return self
                        .apply_action(run, phase, step, step.result_handling.on_success, result)
                        .await;
                }
                StepOutcome::Warning => {
                    return self
                        .apply_action(run, phase, step, step.result_handling.on_warning, result)
                        .await;
                }
                StepOutcome::Failure => {
                    let can_retry = run
                        .state
                        .phase(&phase.name)
                        .is_some_and(|p| p.retries_used < phase.max_retries);
                    if !can_retry {
                        return Err(self.step_failed(run, phase, step, result.message).await);
                    }
                    self.retry(run, phase, step, &result.message).await?;
                }
                StepOutcome::NeedsInput => {
                    if step.result_handling.on_needs_input != OutcomeAction::Prompt {
                        let message = format!("step needs input: {}", result.message);
                        return Err(self.step_failed(run, phase, step, message).await);
                    }
                    match self.request_input(run, phase, step, &result).await? {
                        GateOutcome::Granted(answer) => input = answer,
                        GateOutcome::Paused => return Ok(Flow::Paused),
                    }
                }
            }
        }
    }

    /// Act on a `success` or `warning` result.
    async fn apply_action(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        action: OutcomeAction,
        result: StepResult,
    ) -> Result<Flow, EngineError> {
        match action {
            OutcomeAction::Continue => {
                self.complete_step(run, phase, step, &result).await?;
                Ok(Flow::Continue)
            }
            OutcomeAction::Stop => {
                let message = format!("step reported {}: {}", result.status, result.message);
                Err(self.step_failed(run, phase, step, message).await)
            }
            OutcomeAction::Prompt => {
                let attempt = run
                    .state
                    .step(&phase.name, &step.id)
                    .map(|s| s.attempts)
                    .unwrap_or(1);
                let (kind, prefix, question) = if result.status == StepOutcome::Warning {
                    (
                        DecisionKind::WarningPrompt,
                        "warning",
                        format!(
                            "Step '{}' finished with a warning: {}. Accept and continue?",
                            step.name, result.message
                        ),
                    )
                } else {
                    (
                        DecisionKind::SuccessPrompt,
                        "success",
                        format!(
                            "Step '{}' finished: {}. Accept the result?",
                            step.name, result.message
                        ),
                    )
                };
                let request = gate::request(
                    kind,
                    format!("{prefix}:{}:{attempt}", step.id),
                    question,
                    &phase.name,
                    Some(&step.id),
                );
                let extra = json!({
                    "status": result.status,
                    "message": result.message,
                    "data": result.data,
                });
                match self.gate(run, request, extra).await? {
                    GateOutcome::Granted(_) => {
                        self.complete_step(run, phase, step, &result).await?;
                        Ok(Flow::Continue)
                    }
                    GateOutcome::Paused => Ok(Flow::Paused),
                }
            }
        }
    }

    /// Finish a step whose review prompt was raised before the last pause.
    async fn resolve_review(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        review: &RunEvent,
    ) -> Result<Flow, EngineError> {
        let payload = &review.payload;
        let kind = payload
            .get("kind")
            .and_then(|k| serde_json::from_value(k.clone()).ok())
            .unwrap_or(DecisionKind::WarningPrompt);
        let status = payload
            .get("status")
            .and_then(|s| serde_json::from_value(s.clone()).ok())
            .unwrap_or(StepOutcome::Success);
        let text = |key: &str| {
            payload
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let mut request = gate::request(
            kind,
            review.decision_id().unwrap_or_default().to_string(),
            text("question"),
            &phase.name,
            Some(&step.id),
        );
        request.requested_at = review.timestamp;
        let result = StepResult {
            status,
            message: text("message"),
            data: payload.get("data").cloned().unwrap_or_default(),
            cost_units: None,
        };

        match self.gate(run, request, json!({})).await? {
            GateOutcome::Granted(_) => {
                self.complete_step(run, phase, step, &result).await?;
                Ok(Flow::Continue)
            }
            GateOutcome::Paused => Ok(Flow::Paused),
        }
    }

    async fn request_input(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        result: &StepResult,
    ) -> Result<GateOutcome, EngineError> {
        let events = self.load_events(run.state.run_id).await?;
        let n = EventHistory::new(&events).input_requests(&step.id) + 1;
        let request = gate::request(
            DecisionKind::Input,
            format!("input:{}:{n}", step.id),
            result.message.clone(),
            &phase.name,
            Some(&step.id),
        );
        self.gate(run, request, json!({ "data": result.data })).await
    }

    async fn budget_gate(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
    ) -> Result<Flow, EngineError> {
        let run_id = run.state.run_id;
        let consumed = run.state.budget.consumed_units;
        let ceiling = run.state.budget.ceiling;
        match BudgetTracker::before_dispatch(&mut run.state.budget) {
            BudgetAssessment::Proceed => Ok(Flow::Continue),
            BudgetAssessment::Notice { percent } => {
                self.persist(&mut run.state).await?;
                self.emit(
                    &mut run.state,
                    NewRunEvent::new(run_id, EventKind::BudgetWarning)
                        .phase(phase.name.clone())
                        .step(step.id.clone())
                        .payload(json!({
                            "percent": percent,
                            "consumed_units": consumed,
                            "ceiling": ceiling,
                        })),
                )
                .await?;
                tracing::warn!(run_id = %run_id, percent, "budget warning threshold reached");
                Ok(Flow::Continue)
            }
            BudgetAssessment::RequireApproval { percent } => {
                let request = gate::request(
                    DecisionKind::BudgetApproval,
                    "budget:approval".into(),
                    format!(
                        "Run has used {percent}% of its budget ({consumed} of {} units). Continue?",
                        ceiling.unwrap_or_default()
                    ),
                    &phase.name,
                    Some(&step.id),
                );
                let extra = json!({ "percent": percent, "consumed_units": consumed, "ceiling": ceiling });
                match self.gate(run, request, extra).await? {
                    GateOutcome::Granted(_) => Ok(Flow::Continue),
                    GateOutcome::Paused => Ok(Flow::Paused),
                }
            }
            BudgetAssessment::Exceeded { consumed, ceiling } => {
                Err(self.budget_exceeded(run, phase, step, consumed, ceiling).await)
            }
        }
    }

    async fn check_before_step(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
    ) -> Result<(), EngineError> {
        let branch = if self.guards.needs_branch(step) {
            self.probe.current_branch().await
        } else {
            None
        };
        let events = self.load_events(run.state.run_id).await?;
        let verdict = self.guards.check(
            GuardPoint::BeforeStep,
            &GuardContext {
                state: &run.state,
                events: &events,
                phase: Some(&phase.name),
                step: Some(step),
                branch: branch.as_deref(),
                protected_branches: &self.options.protected_branches,
            },
        );
        match verdict {
            Ok(()) => Ok(()),
            Err(failure) => Err(self
                .guard_failed(run, Some(&phase.name), Some(&step.id), failure)
                .await),
        }
    }

    /// Hand the step to the executor, bounded by the step timeout and the
    /// run's cancellation token. An abort recorded by another process also
    /// cancels the call. Timeouts and executor errors come back as `failure`
    /// results.
    async fn dispatch(
        &self,
        run: &ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        input: Option<String>,
    ) -> Result<StepResult, EngineError> {
        let run_id = run.state.run_id;
        let request = StepRequest {
            run_id,
            phase: phase.name.clone(),
            step_id: step.id.clone(),
            name: step.name.clone(),
            payload: step.payload.clone(),
            arguments: step.arguments.clone(),
            context: step.context.clone(),
            attempt: run
                .state
                .step(&phase.name, &step.id)
                .map(|s| s.attempts)
                .unwrap_or(1),
            input,
            cancel: run.token.child_token(),
        };

        let timeout = self.options.step_timeout;
        let outcome = tokio::select! {
            biased;
            _ = run.token.cancelled() => return Err(EngineError::Aborted { run_id }),
            _ = self.watch_for_abort(run) => return Err(EngineError::Aborted { run_id }),
            outcome = tokio::time::timeout(timeout, self.executor.execute(&request)) => outcome,
        };

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(StepExecutorError::Cancelled)) if run.token.is_cancelled() => {
                Err(EngineError::Aborted { run_id })
            }
            Ok(Err(err)) => {
                tracing::warn!(run_id = %run_id, step_id = step.id.as_str(), error = %err, "executor error");
                Ok(StepResult::failure(err.to_string()))
            }
            Err(_elapsed) => {
                tracing::warn!(
                    run_id = %run_id,
                    step_id = step.id.as_str(),
                    timeout_secs = timeout.as_secs(),
                    "step timed out"
                );
                Ok(StepResult::failure(format!(
                    "step timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn retry(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        reason: &str,
    ) -> Result<(), EngineError> {
        let retries_used = {
            let progress = run
                .state
                .phase_mut(&phase.name)
                .ok_or_else(|| missing_progress(&phase.name))?;
            progress.retries_used += 1;
            progress.retries_used
        };
        let attempt = {
            let progress = run
                .state
                .step_mut(&phase.name, &step.id)
                .ok_or_else(|| missing_progress(&step.id))?;
            progress.attempts += 1;
            progress.attempts
        };
        self.persist(&mut run.state).await?;

        let run_id = run.state.run_id;
        self.emit(
            &mut run.state,
            NewRunEvent::new(run_id, EventKind::StepRetry)
                .phase(phase.name.clone())
                .step(step.id.clone())
                .payload(json!({
                    "attempt": attempt,
                    "retries_used": retries_used,
                    "max_retries": phase.max_retries,
                    "reason": reason,
                })),
        )
        .await?;

        tracing::warn!(
            run_id = %run_id,
            step_id = step.id.as_str(),
            attempt,
            retries_used,
            reason,
            "retrying step"
        );
        Ok(())
    }

    async fn complete_step(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        result: &StepResult,
    ) -> Result<(), EngineError> {
        let attempts = {
            let progress = run
                .state
                .step_mut(&phase.name, &step.id)
                .ok_or_else(|| missing_progress(&step.id))?;
            progress.status = StepStatus::Completed;
            progress.attempts
        };
        run.state.current_step = None;
        self.persist(&mut run.state).await?;

        let run_id = run.state.run_id;
        self.emit(
            &mut run.state,
            NewRunEvent::new(run_id, EventKind::StepComplete)
                .phase(phase.name.clone())
                .step(step.id.clone())
                .payload(json!({
                    "status": result.status,
                    "message": result.message,
                    "data": result.data,
                    "cost_units": result.cost_units,
                    "attempts": attempts,
                })),
        )
        .await?;

        tracing::debug!(run_id = %run_id, step_id = step.id.as_str(), "step complete");
        Ok(())
    }

    async fn step_failed(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        message: String,
    ) -> EngineError {
        let run_id = run.state.run_id;
        let attempts = run
            .state
            .step(&phase.name, &step.id)
            .map(|s| s.attempts)
            .unwrap_or_default();
        tracing::warn!(run_id = %run_id, step_id = step.id.as_str(), attempts, "step failed");

        let event = NewRunEvent::new(run_id, EventKind::StepFailed)
            .phase(phase.name.clone())
            .step(step.id.clone())
            .payload(json!({ "message": message, "attempts": attempts }));
        let err = EngineError::StepExecution {
            run_id,
            step_id: step.id.clone(),
            message: message.clone(),
        };
        self.fail_run(
            run,
            FailureKind::StepExecution,
            message,
            (Some(&phase.name), Some(&step.id)),
            event,
            err,
        )
        .await
    }

    async fn budget_exceeded(
        &self,
        run: &mut ActiveRun<'_>,
        phase: &PlannedPhase,
        step: &PlannedStep,
        consumed: u64,
        ceiling: u64,
    ) -> EngineError {
        let run_id = run.state.run_id;
        tracing::warn!(run_id = %run_id, consumed, ceiling, "budget exceeded");

        let event = NewRunEvent::new(run_id, EventKind::WorkflowFailed)
            .phase(phase.name.clone())
            .step(step.id.clone())
            .payload(json!({
                "kind": FailureKind::BudgetExceeded,
                "reason": "budget_exceeded",
                "consumed_units": consumed,
                "ceiling": ceiling,
            }));
        let err = EngineError::BudgetExceeded {
            run_id,
            consumed,
            ceiling,
        };
        self.fail_run(
            run,
            FailureKind::BudgetExceeded,
            format!("budget exceeded: {consumed} of {ceiling} units"),
            (Some(&phase.name), Some(&step.id)),
            event,
            err,
        )
        .await
    }
}
