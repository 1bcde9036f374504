//! Guard subsystem: mandatory precondition checks.
//!
//! A guard is a pure function of the run state, the event log, and the
//! probed branch. It never mutates anything; the engine turns a failed
//! verdict into a `guard_failed` event and a `failed` run.

mod checks;

pub use checks::{
    BranchSafetyGuard, DestructiveApprovalGuard, ExecutionEvidenceGuard, StateConsistencyGuard,
};

use phaseflow_types::event::RunEvent;
use phaseflow_types::plan::PlannedStep;
use phaseflow_types::run::RunState;

/// Where in the protocol a guard runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPoint {
    /// Before-step, after any approval gates.
    BeforeStep,
    /// Before the run is marked `completed`.
    BeforeCompletion,
}

/// Everything a guard may look at.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    pub state: &'a RunState,
    pub events: &'a [RunEvent],
    pub phase: Option<&'a str>,
    pub step: Option<&'a PlannedStep>,
    /// Probed branch, `None` when unknown or not probed.
    pub branch: Option<&'a str>,
    pub protected_branches: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Pass,
    Fail(String),
}

/// A failed guard, named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardFailure {
    pub guard: &'static str,
    pub reason: String,
}

pub trait Guard: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this guard runs at `point` for `step`.
    fn applies(&self, point: GuardPoint, step: Option<&PlannedStep>) -> bool;

    fn check(&self, ctx: &GuardContext<'_>) -> GuardVerdict;
}

/// Ordered guard list. Guards run in insertion order; the first failure wins.
pub struct GuardSet {
    guards: Vec<Box<dyn Guard>>,
}

impl GuardSet {
    pub fn empty() -> Self {
        Self { guards: Vec::new() }
    }

    /// The four mandatory guards. Evidence runs before consistency.
    pub fn standard() -> Self {
        Self::empty()
            .with(ExecutionEvidenceGuard)
            .with(StateConsistencyGuard)
            .with(BranchSafetyGuard)
            .with(DestructiveApprovalGuard)
    }

    pub fn with<G: Guard + 'static>(mut self, guard: G) -> Self {
        self.guards.push(Box::new(guard));
        self
    }

    /// Whether any guard at `BeforeStep` needs the branch probed for `step`.
    pub fn needs_branch(&self, step: &PlannedStep) -> bool {
        step.touches_vcs()
            && self
                .guards
                .iter()
                .any(|g| g.name() == BranchSafetyGuard::NAME && g.applies(GuardPoint::BeforeStep, Some(step)))
    }

    pub fn check(&self, point: GuardPoint, ctx: &GuardContext<'_>) -> Result<(), GuardFailure> {
        for guard in &self.guards {
            if !guard.applies(point, ctx.step) {
                continue;
            }
            if let GuardVerdict::Fail(reason) = guard.check(ctx) {
                return Err(GuardFailure {
                    guard: guard.name(),
                    reason,
                });
            }
        }
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.guards.iter().map(|g| g.name()).collect()
    }
}

impl Default for GuardSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for GuardSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardSet")
            .field("guards", &self.names())
            .finish()
    }
}
