//! Process-local run store.
//!
//! One [`MemoryRunStore`] implements all three store ports over a
//! `DashMap`, so a run's plan, state and events live and expire together.
//! Runs idle for longer than the TTL are evicted on the next access. Only
//! useful when the engine is embedded in a long-lived process or in tests:
//! nothing survives a restart.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::event::{NewRunEvent, RunEvent};
use phaseflow_types::plan::ExecutionPlan;
use phaseflow_types::run::RunState;
use uuid::Uuid;

/// Default idle lifetime of a run.
pub const DEFAULT_TTL: Duration = Duration::from_secs(86_400);

#[derive(Debug)]
struct RunRecord {
    plan: Option<ExecutionPlan>,
    state: Option<RunState>,
    events: Vec<RunEvent>,
    touched: Instant,
}

impl RunRecord {
    fn new() -> Self {
        Self {
            plan: None,
            state: None,
            events: Vec::new(),
            touched: Instant::now(),
        }
    }
}

/// In-memory implementation of `CheckpointStore`, `EventLog` and
/// `PlanStore`. Clones share the same map.
#[derive(Debug, Clone)]
pub struct MemoryRunStore {
    runs: Arc<DashMap<Uuid, RunRecord>>,
    ttl: Duration,
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl MemoryRunStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            runs: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Number of runs currently held.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Drop every run idle for longer than the TTL.
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        let before = self.runs.len();
        self.runs.retain(|_, record| record.touched.elapsed() < ttl);
        let evicted = before.saturating_sub(self.runs.len());
        if evicted > 0 {
            tracing::debug!(evicted, "evicted idle runs from memory store");
        }
    }

    /// Read a live record, refreshing its idle timer.
    fn read<T>(&self, run_id: Uuid, f: impl FnOnce(&RunRecord) -> T) -> Option<T> {
        self.evict_expired();
        let mut record = self.runs.get_mut(&run_id)?;
        record.touched = Instant::now();
        Some(f(&record))
    }

    /// Mutate a record, creating it if needed.
    fn write<T>(&self, run_id: Uuid, f: impl FnOnce(&mut RunRecord) -> T) -> T {
        self.evict_expired();
        let mut record = self.runs.entry(run_id).or_insert_with(RunRecord::new);
        record.touched = Instant::now();
        f(&mut record)
    }
}

impl CheckpointStore for MemoryRunStore {
    async fn get(&self, run_id: Uuid) -> Result<Option<RunState>, RepositoryError> {
        Ok(self.read(run_id, |r| r.state.clone()).flatten())
    }

    async fn put(&self, state: &RunState) -> Result<(), RepositoryError> {
        self.write(state.run_id, |record| {
            if record.state.is_some() {
                return Err(RepositoryError::Conflict(format!(
                    "run {} already has a state record",
                    state.run_id
                )));
            }
            record.state = Some(state.clone());
            Ok(())
        })
    }

    async fn compare_and_swap(
        &self,
        run_id: Uuid,
        expected_version: u64,
        state: &RunState,
    ) -> Result<u64, RepositoryError> {
        self.evict_expired();
        let Entry::Occupied(mut entry) = self.runs.entry(run_id) else {
            return Err(RepositoryError::Conflict(format!(
                "run {run_id} has no state record"
            )));
        };
        let record = entry.get_mut();
        match &record.state {
            Some(current) if current.version == expected_version => {
                let mut next = state.clone();
                next.version = expected_version + 1;
                record.state = Some(next);
                record.touched = Instant::now();
                Ok(expected_version + 1)
            }
            Some(current) => Err(RepositoryError::Conflict(format!(
                "run {run_id} is at version {}, expected {expected_version}",
                current.version
            ))),
            None => Err(RepositoryError::Conflict(format!(
                "run {run_id} has no state record"
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<RunState>, RepositoryError> {
        self.evict_expired();
        let mut states: Vec<RunState> = self
            .runs
            .iter()
            .filter_map(|r| r.state.clone())
            .collect();
        states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(states)
    }
}

impl EventLog for MemoryRunStore {
    async fn append(&self, event: NewRunEvent) -> Result<RunEvent, RepositoryError> {
        Ok(self.write(event.run_id, |record| {
            let seq = record.events.last().map(|e| e.seq).unwrap_or(0) + 1;
            let stored = event.sequenced(seq);
            record.events.push(stored.clone());
            stored
        }))
    }

    async fn list(&self, run_id: Uuid, since_seq: u64) -> Result<Vec<RunEvent>, RepositoryError> {
        Ok(self
            .read(run_id, |record| {
                record
                    .events
                    .iter()
                    .filter(|e| e.seq > since_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl PlanStore for MemoryRunStore {
    async fn save(&self, plan: &ExecutionPlan) -> Result<(), RepositoryError> {
        self.write(plan.run_id, |record| {
            if record.plan.is_some() {
                return Err(RepositoryError::Conflict(format!(
                    "run {} already has a plan",
                    plan.run_id
                )));
            }
            record.plan = Some(plan.clone());
            Ok(())
        })
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<ExecutionPlan>, RepositoryError> {
        Ok(self.read(run_id, |r| r.plan.clone()).flatten())
    }
}
