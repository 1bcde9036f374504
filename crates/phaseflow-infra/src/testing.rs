//! Fixtures and store contracts shared by the backend tests.
//!
//! Every backend runs the same contract functions, so file, SQLite and
//! memory stores are held to identical semantics.

use chrono::Utc;
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::budget::BudgetLedger;
use phaseflow_types::event::{EventKind, NewRunEvent};
use phaseflow_types::plan::{
    AutonomyLevel, ExecutionPlan, PlannedPhase, PlannedStep, StepPayload, WorkReference,
};
use phaseflow_types::run::{RunState, RunStatus};
use phaseflow_types::workflow::ResultHandling;
use serde_json::json;
use uuid::Uuid;

pub fn sample_plan() -> ExecutionPlan {
    let step = PlannedStep {
        id: "implement".into(),
        name: "Implement".into(),
        prompt: "implement issue 42".into(),
        context: None,
        payload: StepPayload::FreeformInstruction {
            text: "implement issue 42".into(),
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
        work_reference: WorkReference::Issue { id: "42".into() },
        workflow_id: "standard".into(),
        workflow_version: "1.0.0".into(),
        inheritance_chain: vec!["standard".into()],
        autonomy_level: AutonomyLevel::Supervised,
        phases: vec![PlannedPhase {
            name: "build".into(),
            steps: vec![step],
            requires_approval: false,
            max_retries: 2,
        }],
        created_at: Utc::now(),
    }
}

pub fn sample_state() -> RunState {
    RunState::new(&sample_plan(), BudgetLedger::default())
}

pub async fn checkpoint_contract<S: CheckpointStore>(store: &S) {
    let state = sample_state();
    let run_id = state.run_id;

    assert!(store.get(run_id).await.unwrap().is_none());
    store.put(&state).await.unwrap();
    assert_eq!(store.get(run_id).await.unwrap().as_ref(), Some(&state));
    assert!(store.put(&state).await.unwrap_err().is_conflict());

    let mut running = state.clone();
    running.status = RunStatus::Running;

    let stale = store
        .compare_and_swap(run_id, state.version + 1, &running)
        .await
        .unwrap_err();
    assert!(stale.is_conflict());
    assert_eq!(store.get(run_id).await.unwrap().unwrap().status, RunStatus::Pending);

    let version = store
        .compare_and_swap(run_id, state.version, &running)
        .await
        .unwrap();
    assert_eq!(version, state.version + 1);
    let stored = store.get(run_id).await.unwrap().unwrap();
    assert_eq!(stored.version, version);
    assert_eq!(stored.status, RunStatus::Running);

    // The old version lost the race.
    assert!(store
        .compare_and_swap(run_id, state.version, &running)
        .await
        .unwrap_err()
        .is_conflict());

    assert!(store
        .compare_and_swap(Uuid::now_v7(), 1, &running)
        .await
        .unwrap_err()
        .is_conflict());

    let listed = store.list().await.unwrap();
    assert!(listed.iter().any(|s| s.run_id == run_id && s.version == version));
}

pub async fn event_log_contract<L: EventLog>(log: &L) {
    let run_id = Uuid::now_v7();
    let other = Uuid::now_v7();

    assert!(log.list(run_id, 0).await.unwrap().is_empty());

    let first = log
        .append(NewRunEvent::new(run_id, EventKind::WorkflowStarted))
        .await
        .unwrap();
    let second = log
        .append(
            NewRunEvent::new(run_id, EventKind::StepStart)
                .phase("build")
                .step("implement")
                .payload(json!({"attempt": 1})),
        )
        .await
        .unwrap();
    log.append(NewRunEvent::new(run_id, EventKind::StepComplete).step("implement"))
        .await
        .unwrap();
    let foreign = log
        .append(NewRunEvent::new(other, EventKind::WorkflowStarted))
        .await
        .unwrap();

    assert_eq!(first.seq, 1);
    assert_eq!(second.seq, 2);
    assert_eq!(foreign.seq, 1);

    let all = log.list(run_id, 0).await.unwrap();
    let seqs: Vec<u64> = all.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, [1, 2, 3]);
    assert_eq!(all[1], second);
    assert_eq!(all[1].payload["attempt"], 1);
    assert_eq!(all[1].phase.as_deref(), Some("build"));

    let tail = log.list(run_id, 2).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].kind, EventKind::StepComplete);
    assert!(log.list(run_id, 3).await.unwrap().is_empty());
}

pub async fn plan_store_contract<P: PlanStore>(store: &P) {
    let plan = sample_plan();

    assert!(store.get(plan.run_id).await.unwrap().is_none());
    store.save(&plan).await.unwrap();
    assert_eq!(store.get(plan.run_id).await.unwrap().as_ref(), Some(&plan));
    assert!(store.save(&plan).await.unwrap_err().is_conflict());
}
