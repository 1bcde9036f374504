//! Execution engine: drives one run through its plan as a resumable state
//! machine.
//!
//! # Protocol
//!
//! 1. `pending` runs start (`workflow_started`); `paused`, `running` and
//!    resumable `failed` runs resume (`workflow_resumed`) after reconciling
//!    step status against the event log.
//! 2. Phases run in plan order. A gated phase asks for approval before its
//!    first step.
//! 3. Each step: destructive gate -> budget gate -> before-step guards ->
//!    `step_start` -> execute (retrying within the phase's budget) ->
//!    outcome handling -> `step_complete`.
//! 4. Completion guards run before `workflow_complete`.
//!
//! Every state change is a compare-and-swap on the checkpoint store and
//! happens before the event describing it is appended. A lost swap stops
//! the engine with `ConcurrencyConflict` (or `Aborted` when the winner was
//! an abort); it never overwrites.

mod gate;
mod report;
mod step;

pub use report::RunReport;

use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use phaseflow_types::budget::BudgetLedger;
use phaseflow_types::decision::Decision;
use phaseflow_types::event::{EventKind, NewRunEvent, RunEvent};
use phaseflow_types::plan::{ExecutionPlan, PlannedPhase};
use phaseflow_types::run::{FailureKind, PhaseStatus, RunState, RunStatus, StepStatus};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::decision::{BoxDecisionChannel, DecisionChannel};
use crate::error::EngineError;
use crate::event::EventBus;
use crate::executor::BoxStepExecutor;
use crate::guard::{GuardContext, GuardFailure, GuardPoint, GuardSet};
use crate::probe::{BoxBranchProbe, BranchProbe, FixedBranchProbe};
use crate::repository::checkpoint::CheckpointStore;
use crate::repository::event_log::{EventHistory, EventLog};
use crate::repository::plan::PlanStore;

use self::gate::answer_event;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default per-step timeout (30 minutes).
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 1800;

/// Default interval between checkpoint reads while a step or decision is
/// outstanding, so an abort from another process is noticed.
pub const DEFAULT_ABORT_POLL_SECS: u64 = 2;

/// Abort re-reads and retries this many times when it loses a swap.
const ABORT_SWAP_ATTEMPTS: usize = 5;

// ---------------------------------------------------------------------------
// EngineOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub step_timeout: Duration,
    /// How often a waiting driver re-reads the stored state for an abort
    /// recorded by another engine instance.
    pub abort_poll_interval: Duration,
    pub protected_branches: Vec<String>,
    /// Copied into every submitted run: ceiling and thresholds.
    pub budget: BudgetLedger,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            abort_poll_interval: Duration::from_secs(DEFAULT_ABORT_POLL_SECS),
            protected_branches: vec!["main".into(), "master".into()],
            budget: BudgetLedger::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Drives runs against a checkpoint store, an event log and a plan store.
///
/// Generic over the three stores so each backend is statically dispatched;
/// the executor, probe and decision channel are boxed because the caller
/// picks them at runtime.
pub struct Engine<C, L, P> {
    checkpoints: C,
    events: L,
    plans: P,
    executor: BoxStepExecutor,
    probe: BoxBranchProbe,
    channel: Option<BoxDecisionChannel>,
    guards: GuardSet,
    bus: EventBus,
    options: EngineOptions,
    /// Cancellation tokens of runs driven by this instance.
    active: DashMap<Uuid, CancellationToken>,
}

/// The run being driven: its plan, its in-memory state, its cancel token.
struct ActiveRun<'p> {
    plan: &'p ExecutionPlan,
    state: RunState,
    token: CancellationToken,
}

/// Whether driving may continue after a step or gate.
enum Flow {
    Continue,
    Paused,
}

impl<C, L, P> Engine<C, L, P>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    pub fn new(
        checkpoints: C,
        events: L,
        plans: P,
        executor: BoxStepExecutor,
        options: EngineOptions,
    ) -> Self {
        Self {
            checkpoints,
            events,
            plans,
            executor,
            probe: BoxBranchProbe::new(FixedBranchProbe::default()),
            channel: None,
            guards: GuardSet::standard(),
            bus: EventBus::default(),
            options,
            active: DashMap::new(),
        }
    }

    pub fn with_probe<T: BranchProbe + 'static>(mut self, probe: T) -> Self {
        self.probe = BoxBranchProbe::new(probe);
        self
    }

    /// Answer gates inline through `channel` instead of pausing.
    pub fn with_decision_channel<T: DecisionChannel + 'static>(mut self, channel: T) -> Self {
        self.channel = Some(BoxDecisionChannel::new(channel));
        self
    }

    pub fn with_guards(mut self, guards: GuardSet) -> Self {
        self.guards = guards;
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Receive every event this engine appends from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Whether this instance is currently driving `run_id`.
    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.active.contains_key(&run_id)
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Persist a compiled plan and its initial `pending` state.
    pub async fn submit(&self, plan: &ExecutionPlan) -> Result<RunReport, EngineError> {
        self.plans.save(plan).await?;
        let state = RunState::new(plan, self.options.budget.clone());
        self.checkpoints.put(&state).await?;

        tracing::info!(
            run_id = %plan.run_id,
            workflow = plan.workflow_id.as_str(),
            steps = plan.total_steps(),
            "run submitted"
        );
        Ok(RunReport::from_state(&state))
    }

    /// Start, resume, or report on a run until it completes, pauses, or
    /// fails.
    ///
    /// A completed run is reported without changes. A paused run whose
    /// decision is still unanswered is reported as-is unless a decision
    /// channel can answer it now.
    pub async fn run(&self, run_id: Uuid) -> Result<RunReport, EngineError> {
        let plan = self.plan(run_id).await?;
        let state = self.status(run_id).await?;

        if state.status == RunStatus::Completed {
            return Ok(RunReport::from_state(&state));
        }
        if state.status == RunStatus::Paused
            && self.channel.is_none()
            && self.awaiting_answer(&state).await?
        {
            return Ok(RunReport::from_state(&state));
        }

        let token = CancellationToken::new();
        match self.active.entry(run_id) {
            Entry::Occupied(_) => return Err(EngineError::ConcurrencyConflict { run_id }),
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let mut run = ActiveRun {
            plan: &plan,
            state,
            token,
        };
        let result = self.drive(&mut run).await;

        // Clean up cancellation token
        self.active.remove(&run_id);

        if let Err(err) = &result {
            tracing::warn!(run_id = %run_id, error = %err, "run stopped");
        }
        result
    }

    /// Abort a non-terminal run: `failed` with `user_aborted`, then a
    /// `workflow_failed` event, then cancellation of any in-flight step.
    ///
    /// Works across processes: a driver elsewhere notices while it waits on
    /// a step or decision, or at its next swap.
    pub async fn abort(&self, run_id: Uuid) -> Result<RunReport, EngineError> {
        let mut attempts = 0;
        let state = loop {
            let mut state = self.status(run_id).await?;
            if state.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    run_id,
                    status: state.status,
                    reason: "run already finished".into(),
                });
            }

            let expected = state.version;
            let step_id = state.current_step.clone();
            state.fail(FailureKind::UserAborted, "user_aborted", step_id);
            match self
                .checkpoints
                .compare_and_swap(run_id, expected, &state)
                .await
            {
                Ok(version) => {
                    state.version = version;
                    break state;
                }
                Err(err) if err.is_conflict() && attempts < ABORT_SWAP_ATTEMPTS => {
                    attempts += 1;
                }
                Err(err) if err.is_conflict() => {
                    return Err(EngineError::ConcurrencyConflict { run_id });
                }
                Err(err) => return Err(err.into()),
            }
        };

        let mut event = NewRunEvent::new(run_id, EventKind::WorkflowFailed).payload(json!({
            "kind": FailureKind::UserAborted,
            "reason": "user_aborted",
            "step_id": state.current_step,
        }));
        if let Some(phase) = &state.current_phase {
            event = event.phase(phase.clone());
        }
        self.append(event).await?;

        if let Some(token) = self.active.get(&run_id) {
            token.cancel();
        }

        tracing::info!(run_id = %run_id, "run aborted");
        Ok(RunReport::from_state(&state))
    }

    /// Answer the decision a paused run is waiting on.
    ///
    /// A grant is logged and the run stays `paused` until the next `run`. A
    /// rejection fails the run with `approval_rejected`.
    pub async fn record_decision(
        &self,
        run_id: Uuid,
        decision: Decision,
    ) -> Result<RunReport, EngineError> {
        let mut state = self.status(run_id).await?;
        let Some(request) = state
            .pending_decision
            .clone()
            .filter(|r| r.decision_id == decision.decision_id)
        else {
            return Err(EngineError::UnknownDecision {
                run_id,
                decision_id: decision.decision_id,
            });
        };

        if decision.is_granted() {
            state.pending_decision = None;
        } else {
            state.fail(
                FailureKind::ApprovalRejected,
                format!("decision '{}' was rejected", request.decision_id),
                request.step_id.clone(),
            );
        }
        self.persist(&mut state).await?;
        self.append(answer_event(run_id, &request, &decision)).await?;

        if !decision.is_granted() {
            let mut event = NewRunEvent::new(run_id, EventKind::WorkflowFailed).payload(json!({
                "kind": FailureKind::ApprovalRejected,
                "reason": "approval_rejected",
                "decision_id": request.decision_id,
            }));
            if let Some(phase) = &request.phase {
                event = event.phase(phase.clone());
            }
            self.append(event).await?;
        }

        tracing::info!(
            run_id = %run_id,
            decision_id = request.decision_id.as_str(),
            outcome = %decision.outcome,
            "decision recorded"
        );
        Ok(RunReport::from_state(&state))
    }

    pub async fn status(&self, run_id: Uuid) -> Result<RunState, EngineError> {
        self.checkpoints
            .get(run_id)
            .await?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    pub async fn plan(&self, run_id: Uuid) -> Result<ExecutionPlan, EngineError> {
        self.plans
            .get(run_id)
            .await?
            .ok_or(EngineError::PlanNotFound(run_id))
    }

    /// Events with `seq > since_seq`.
    pub async fn events(&self, run_id: Uuid, since_seq: u64) -> Result<Vec<RunEvent>, EngineError> {
        Ok(self.events.list(run_id, since_seq).await?)
    }

    pub async fn list_runs(&self) -> Result<Vec<RunState>, EngineError> {
        Ok(self.checkpoints.list().await?)
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    async fn drive(&self, run: &mut ActiveRun<'_>) -> Result<RunReport, EngineError> {
        match run.state.status {
            RunStatus::Pending => self.start(run).await?,
            _ => self.resume(run).await?,
        }

        let plan = run.plan;
        for phase in &plan.phases {
            self.check_cancelled(run)?;
            if run
                .state
                .phase(&phase.name)
                .is_some_and(|p| p.status == PhaseStatus::Completed)
            {
                tracing::debug!(phase = phase.name.as_str(), "skipping completed phase");
                continue;
            }

            if plan.autonomy_level.gates_phase(phase.requires_approval) {
                let request = gate::phase_request(phase);
                if let gate::GateOutcome::Paused = self.gate(run, request, json!({})).await? {
                    return Ok(RunReport::from_state(&run.state));
                }
            }

            self.enter_phase(run, phase).await?;
            for step in &phase.steps {
                if run
                    .state
                    .step(&phase.name, &step.id)
                    .is_some_and(|s| s.status == StepStatus::Completed)
                {
                    continue;
                }
                self.check_cancelled(run)?;
                if let Flow::Paused = self.run_step(run, phase, step).await? {
                    return Ok(RunReport::from_state(&run.state));
                }
            }
            self.complete_phase(run, phase).await?;
        }

        self.complete_run(run).await
    }

    async fn start(&self, run: &mut ActiveRun<'_>) -> Result<(), EngineError> {
        let plan = run.plan;
        run.state.status = RunStatus::Running;
        run.state.started_at = Some(chrono::Utc::now());
        self.persist(&mut run.state).await?;
        self.emit(
            &mut run.state,
            NewRunEvent::new(plan.run_id, EventKind::WorkflowStarted).payload(json!({
                "plan_id": plan.plan_id,
                "workflow_id": plan.workflow_id,
                "workflow_version": plan.workflow_version,
                "work_reference": plan.work_reference.to_string(),
                "autonomy": plan.autonomy_level,
                "total_steps": plan.total_steps(),
            })),
        )
        .await?;

        tracing::info!(
            run_id = %plan.run_id,
            workflow = plan.workflow_id.as_str(),
            "starting run"
        );
        Ok(())
    }

    /// Reconcile state with the log and flip the run back to `running`.
    ///
    /// The log is authoritative: a step counts as completed only with a
    /// `step_complete` event, so a step whose completion was never logged
    /// runs again. The last `step_start` without a terminal event is the
    /// resume point.
    async fn resume(&self, run: &mut ActiveRun<'_>) -> Result<(), EngineError> {
        let run_id = run.state.run_id;
        let previous = run.state.status;
        if let Some(failure) = run.state.failure.as_ref().filter(|f| !f.kind.is_resumable()) {
            return Err(EngineError::InvalidTransition {
                run_id,
                status: previous,
                reason: format!("a run that failed with {} cannot be resumed", failure.kind),
            });
        }

        let events = self.load_events(run_id).await?;
        let history = EventHistory::new(&events);
        let completed = history.completed_steps();
        for phase in &mut run.state.phases {
            for step in &mut phase.steps {
                if completed.contains(step.step_id.as_str()) {
                    step.status = StepStatus::Completed;
                } else if matches!(step.status, StepStatus::Completed | StepStatus::Failed) {
                    step.status = StepStatus::Pending;
                }
            }
            if history.phase_completed(&phase.name) {
                phase.status = PhaseStatus::Completed;
            } else if matches!(phase.status, PhaseStatus::Completed | PhaseStatus::Failed) {
                phase.status = PhaseStatus::Pending;
            }
        }

        let in_flight = history
            .in_flight_step()
            .and_then(|e| Some((e.phase.clone()?, e.step_id.clone()?)));
        if let Some((phase, step_id)) = &in_flight {
            if let Some(step) = run.state.step_mut(phase, step_id) {
                step.status = StepStatus::InProgress;
            }
            run.state.current_phase = Some(phase.clone());
            run.state.current_step = Some(step_id.clone());
        }

        let decision_id = run
            .state
            .pending_decision
            .take()
            .map(|d| d.decision_id);
        run.state.status = RunStatus::Running;
        run.state.failure = None;
        run.state.finished_at = None;
        self.persist(&mut run.state).await?;

        let completed_steps = run.state.completed_steps();
        self.emit(
            &mut run.state,
            NewRunEvent::new(run_id, EventKind::WorkflowResumed).payload(json!({
                "from": previous,
                "decision_id": decision_id,
                "completed_steps": completed_steps,
                "in_flight_step": in_flight.as_ref().map(|(_, step_id)| step_id),
            })),
        )
        .await?;

        tracing::info!(
            run_id = %run_id,
            from = %previous,
            skipping = completed_steps,
            in_flight = ?in_flight.as_ref().map(|(_, step_id)| step_id),
            "resuming run"
        );
        Ok(())
    }

    async fn enter_phase(&self, run: &mut ActiveRun<'_>, phase: &PlannedPhase) -> Result<(), EngineError> {
        let already_running = run
            .state
            .phase(&phase.name)
            .ok_or_else(|| missing_progress(&phase.name))?
            .status
            == PhaseStatus::Running;
        if already_running && run.state.current_phase.as_deref() == Some(phase.name.as_str()) {
            return Ok(());
        }
        if let Some(progress) = run.state.phase_mut(&phase.name) {
            progress.status = PhaseStatus::Running;
        }
        run.state.current_phase = Some(phase.name.clone());
        self.persist(&mut run.state).await?;

        tracing::debug!(run_id = %run.state.run_id, phase = phase.name.as_str(), "entering phase");
        Ok(())
    }

    async fn complete_phase(&self, run: &mut ActiveRun<'_>, phase: &PlannedPhase) -> Result<(), EngineError> {
        let progress = run
            .state
            .phase_mut(&phase.name)
            .ok_or_else(|| missing_progress(&phase.name))?;
        progress.status = PhaseStatus::Completed;
        run.state.current_step = None;
        self.persist(&mut run.state).await?;

        let run_id = run.state.run_id;
        self.emit(
            &mut run.state,
            NewRunEvent::new(run_id, EventKind::PhaseComplete)
                .phase(phase.name.clone())
                .payload(json!({ "steps": phase.steps.len() })),
        )
        .await?;
        Ok(())
    }

    async fn complete_run(&self, run: &mut ActiveRun<'_>) -> Result<RunReport, EngineError> {
        let run_id = run.state.run_id;
        let events = self.load_events(run_id).await?;
        let verdict = self.guards.check(
            GuardPoint::BeforeCompletion,
            &GuardContext {
                state: &run.state,
                events: &events,
                phase: None,
                step: None,
                branch: None,
                protected_branches: &self.options.protected_branches,
            },
        );
        if let Err(failure) = verdict {
            return Err(self.guard_failed(run, None, None, failure).await);
        }

        run.state.status = RunStatus::Completed;
        run.state.current_phase = None;
        run.state.current_step = None;
        run.state.finished_at = Some(chrono::Utc::now());
        self.persist(&mut run.state).await?;

        let completed_steps = run.state.completed_steps();
        let consumed_units = run.state.budget.consumed_units;
        self.emit(
            &mut run.state,
            NewRunEvent::new(run_id, EventKind::WorkflowComplete).payload(json!({
                "completed_steps": completed_steps,
                "consumed_units": consumed_units,
            })),
        )
        .await?;

        tracing::info!(run_id = %run_id, steps = completed_steps, "run completed");
        Ok(RunReport::from_state(&run.state))
    }

    // -----------------------------------------------------------------------
    // Failure paths
    // -----------------------------------------------------------------------

    /// Fail the run, persist, then append its terminal `event`.
    ///
    /// Returns `err` unless persisting or appending fails first, in which
    /// case that error wins.
    async fn fail_run(
        &self,
        run: &mut ActiveRun<'_>,
        kind: FailureKind,
        reason: String,
        location: (Option<&str>, Option<&str>),
        event: NewRunEvent,
        err: EngineError,
    ) -> EngineError {
        let (phase, step_id) = location;
        if let (Some(phase), Some(step_id)) = (phase, step_id) {
            if let Some(step) = run.state.step_mut(phase, step_id) {
                step.status = StepStatus::Failed;
            }
            if let Some(progress) = run.state.phase_mut(phase) {
                progress.status = PhaseStatus::Failed;
            }
        }
        run.state.fail(kind, reason, step_id.map(str::to_string));
        if let Err(persist_err) = self.persist(&mut run.state).await {
            return persist_err;
        }
        if let Err(append_err) = self.emit(&mut run.state, event).await {
            return append_err;
        }
        err
    }

    async fn guard_failed(
        &self,
        run: &mut ActiveRun<'_>,
        phase: Option<&str>,
        step_id: Option<&str>,
        failure: GuardFailure,
    ) -> EngineError {
        let run_id = run.state.run_id;
        tracing::warn!(
            run_id = %run_id,
            guard = failure.guard,
            reason = failure.reason.as_str(),
            "guard failed"
        );

        let mut event = NewRunEvent::new(run_id, EventKind::GuardFailed).payload(json!({
            "guard": failure.guard,
            "reason": failure.reason,
        }));
        if let Some(phase) = phase {
            event = event.phase(phase);
        }
        if let Some(step_id) = step_id {
            event = event.step(step_id);
        }
        let err = EngineError::GuardFailure {
            run_id,
            guard: failure.guard.to_string(),
            reason: failure.reason.clone(),
        };
        self.fail_run(
            run,
            FailureKind::Guard,
            format!("{}: {}", failure.guard, failure.reason),
            (phase, step_id),
            event,
            err,
        )
        .await
    }

    /// Resolves once the stored state shows the run aborted, cancelling the
    /// run's token. Never resolves otherwise.
    ///
    /// `abort` only cancels tokens held by its own instance; this is how a
    /// driver learns of an abort recorded by another process.
    pub(super) async fn watch_for_abort(&self, run: &ActiveRun<'_>) {
        let run_id = run.state.run_id;
        let period = self.options.abort_poll_interval.max(Duration::from_millis(10));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.checkpoints.get(run_id).await {
                Ok(Some(state)) if state.is_aborted() => {
                    tracing::info!(run_id = %run_id, "run aborted elsewhere, cancelling");
                    run.token.cancel();
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(run_id = %run_id, error = %err, "abort check failed");
                }
            }
        }
    }

    fn check_cancelled(&self, run: &ActiveRun<'_>) -> Result<(), EngineError> {
        if run.token.is_cancelled() {
            return Err(EngineError::Aborted {
                run_id: run.state.run_id,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Compare-and-swap `state` against its own version and adopt the new
    /// version on success.
    async fn persist(&self, state: &mut RunState) -> Result<(), EngineError> {
        let run_id = state.run_id;
        state.touch();
        match self
            .checkpoints
            .compare_and_swap(run_id, state.version, state)
            .await
        {
            Ok(version) => {
                state.version = version;
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                let current = self.checkpoints.get(run_id).await?;
                if current.as_ref().is_some_and(RunState::is_aborted) {
                    return Err(EngineError::Aborted { run_id });
                }
                tracing::warn!(
                    run_id = %run_id,
                    expected = state.version,
                    found = ?current.map(|s| s.version),
                    "checkpoint version conflict"
                );
                Err(EngineError::ConcurrencyConflict { run_id })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Append outside of a drive and publish the stored event.
    async fn append(&self, event: NewRunEvent) -> Result<RunEvent, EngineError> {
        let run_id = event.run_id;
        let stored = self
            .events
            .append(event)
            .await
            .map_err(|e| EngineError::EventLog {
                run_id,
                reason: e.to_string(),
            })?;
        tracing::debug!(run_id = %run_id, seq = stored.seq, kind = %stored.kind, "event appended");
        self.bus.publish(stored.clone());
        Ok(stored)
    }

    /// Append during a drive. A failed append also fails the run.
    async fn emit(&self, state: &mut RunState, event: NewRunEvent) -> Result<RunEvent, EngineError> {
        let kind = event.kind;
        match self.append(event).await {
            Ok(stored) => Ok(stored),
            Err(err) => {
                tracing::error!(run_id = %state.run_id, kind = %kind, error = %err, "event log append failed");
                if !state.status.is_terminal() {
                    let step_id = state.current_step.clone();
                    state.fail(FailureKind::Internal, err.to_string(), step_id);
                    if let Err(persist_err) = self.persist(state).await {
                        tracing::error!(
                            run_id = %state.run_id,
                            error = %persist_err,
                            "could not persist failed state after append failure"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    async fn load_events(&self, run_id: Uuid) -> Result<Vec<RunEvent>, EngineError> {
        Ok(self.events.list(run_id, 0).await?)
    }

    /// A paused run whose pending decision has no logged answer yet.
    async fn awaiting_answer(&self, state: &RunState) -> Result<bool, EngineError> {
        let Some(request) = &state.pending_decision else {
            return Ok(false);
        };
        let events = self.load_events(state.run_id).await?;
        Ok(EventHistory::new(&events)
            .answer(&request.decision_id)
            .is_none())
    }
}

fn missing_progress(name: &str) -> EngineError {
    EngineError::Validation(format!("run state has no progress entry for '{name}'"))
}

impl<C, L, P> std::fmt::Debug for Engine<C, L, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("executor", &self.executor)
            .field("guards", &self.guards)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
