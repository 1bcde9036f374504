//! In-memory fakes shared by the unit tests in this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::event::{NewRunEvent, RunEvent};
use phaseflow_types::plan::{
    AutonomyLevel, ExecutionPlan, PlannedPhase, PlannedStep, StepPayload, WorkReference,
};
use phaseflow_types::run::RunState;
use phaseflow_types::step::StepResult;
use phaseflow_types::workflow::ResultHandling;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::executor::{StepExecutor, StepExecutorError, StepRequest};
use crate::repository::checkpoint::CheckpointStore;
use crate::repository::event_log::EventLog;
use crate::repository::plan::PlanStore;

// ---------------------------------------------------------------------------
// Plan builders
// ---------------------------------------------------------------------------

pub fn step(id: &str) -> PlannedStep {
    PlannedStep {
        id: id.into(),
        name: id.into(),
        prompt: format!("do {id}"),
        context: None,
        payload: StepPayload::FreeformInstruction {
            text: format!("do {id}"),
            context: None,
        },
        arguments: Default::default(),
        effects: Default::default(),
        result_handling: ResultHandling::default(),
        origin: "test".into(),
    }
}

/// `(name, steps, requires_approval, max_retries)` per phase.
pub fn plan_with(phases: Vec<(&str, Vec<PlannedStep>, bool, u32)>) -> ExecutionPlan {
    ExecutionPlan {
        plan_id: Uuid::now_v7(),
        run_id: Uuid::now_v7(),
        work_reference: WorkReference::Issue { id: "42".into() },
        workflow_id: "test".into(),
        workflow_version: "1.0.0".into(),
        inheritance_chain: vec!["test".into()],
        autonomy_level: AutonomyLevel::Supervised,
        phases: phases
            .into_iter()
            .map(|(name, steps, requires_approval, max_retries)| PlannedPhase {
                name: name.into(),
                steps,
                requires_approval,
                max_retries,
            })
            .collect(),
        created_at: Utc::now(),
    }
}

pub fn request_for(step_id: &str) -> StepRequest {
    let step = step(step_id);
    StepRequest {
        run_id: Uuid::now_v7(),
        phase: "build".into(),
        step_id: step.id,
        name: step.name,
        payload: step.payload,
        arguments: step.arguments,
        context: None,
        attempt: 1,
        input: None,
        cancel: CancellationToken::new(),
    }
}

// ---------------------------------------------------------------------------
// Stores
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemCheckpoints {
    states: Arc<Mutex<HashMap<Uuid, RunState>>>,
    /// Swaps still allowed before every swap fails; `None` is unlimited.
    swaps_left: Arc<Mutex<Option<usize>>>,
}

impl MemCheckpoints {
    /// Advance the stored version as if another writer got there first.
    pub fn bump(&self, run_id: Uuid) {
        if let Some(state) = self.states.lock().unwrap().get_mut(&run_id) {
            state.version += 1;
        }
    }

    /// Let `n` more swaps through, then fail every later one.
    pub fn fail_swaps_after(&self, n: usize) {
        *self.swaps_left.lock().unwrap() = Some(n);
    }

    pub fn snapshot(&self, run_id: Uuid) -> Option<RunState> {
        self.states.lock().unwrap().get(&run_id).cloned()
    }
}

impl CheckpointStore for MemCheckpoints {
    async fn get(&self, run_id: Uuid) -> Result<Option<RunState>, RepositoryError> {
        Ok(self.snapshot(run_id))
    }

    async fn put(&self, state: &RunState) -> Result<(), RepositoryError> {
        let mut states = self.states.lock().unwrap();
        if states.contains_key(&state.run_id) {
            return Err(RepositoryError::Conflict("run exists".into()));
        }
        states.insert(state.run_id, state.clone());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        run_id: Uuid,
        expected_version: u64,
        state: &RunState,
    ) -> Result<u64, RepositoryError> {
        if let Some(left) = self.swaps_left.lock().unwrap().as_mut() {
            if *left == 0 {
                return Err(RepositoryError::Query("store offline".into()));
            }
            *left -= 1;
        }
        let mut states = self.states.lock().unwrap();
        match states.get(&run_id) {
            Some(current) if current.version == expected_version => {
                let mut next = state.clone();
                next.version = expected_version + 1;
                states.insert(run_id, next);
                Ok(expected_version + 1)
            }
            _ => Err(RepositoryError::Conflict("version mismatch".into())),
        }
    }

    async fn list(&self) -> Result<Vec<RunState>, RepositoryError> {
        Ok(self.states.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Clone, Default)]
pub struct MemEvents {
    events: Arc<Mutex<HashMap<Uuid, Vec<RunEvent>>>>,
    broken: Arc<AtomicBool>,
}

impl MemEvents {
    pub fn all(&self, run_id: Uuid) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap()
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn kinds(&self, run_id: Uuid) -> Vec<String> {
        self.all(run_id)
            .iter()
            .map(|e| e.kind.as_str().to_string())
            .collect()
    }

    /// Make every later append fail.
    pub fn break_appends(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl EventLog for MemEvents {
    async fn append(&self, event: NewRunEvent) -> Result<RunEvent, RepositoryError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("disk full".into()));
        }
        let mut events = self.events.lock().unwrap();
        let log = events.entry(event.run_id).or_default();
        let stored = event.sequenced(log.len() as u64 + 1);
        log.push(stored.clone());
        Ok(stored)
    }

    async fn list(&self, run_id: Uuid, since_seq: u64) -> Result<Vec<RunEvent>, RepositoryError> {
        Ok(self
            .all(run_id)
            .into_iter()
            .filter(|e| e.seq > since_seq)
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct MemPlans {
    plans: Arc<Mutex<HashMap<Uuid, ExecutionPlan>>>,
}

impl PlanStore for MemPlans {
    async fn save(&self, plan: &ExecutionPlan) -> Result<(), RepositoryError> {
        let mut plans = self.plans.lock().unwrap();
        if plans.contains_key(&plan.run_id) {
            return Err(RepositoryError::Conflict("plan exists".into()));
        }
        plans.insert(plan.run_id, plan.clone());
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<ExecutionPlan>, RepositoryError> {
        Ok(self.plans.lock().unwrap().get(&run_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

type Hook = Arc<dyn Fn(&StepRequest) + Send + Sync>;

/// Returns queued results per step id, then `success` once a queue is empty.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    scripts: Arc<Mutex<HashMap<String, VecDeque<StepResult>>>>,
    requests: Arc<Mutex<Vec<StepRequest>>>,
    hook: Option<Hook>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, step_id: &str, results: Vec<StepResult>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(step_id.into(), results.into());
        self
    }

    /// Run `hook` at the start of every execution.
    pub fn on_execute(mut self, hook: impl Fn(&StepRequest) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn calls(&self, step_id: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.step_id == step_id)
            .count()
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl StepExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepResult, StepExecutorError> {
        if let Some(hook) = &self.hook {
            hook(request);
        }
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.step_id)
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or_else(|| StepResult::success(format!("{} done", request.step_id))))
    }
}

/// Signals `started` and then blocks until the request is cancelled.
#[derive(Clone, Default)]
pub struct BlockingExecutor {
    pub started: Arc<Notify>,
}

impl StepExecutor for BlockingExecutor {
    fn name(&self) -> &str {
        "blocking"
    }

    async fn execute(&self, request: &StepRequest) -> Result<StepResult, StepExecutorError> {
        self.started.notify_one();
        request.cancel.cancelled().await;
        Err(StepExecutorError::Cancelled)
    }
}
