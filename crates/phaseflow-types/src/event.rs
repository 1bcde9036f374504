//! Audit events appended to a run's event log.
//!
//! Events are immutable facts. The log assigns `seq` on append; callers build
//! a [`NewRunEvent`] and get back the stored [`RunEvent`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WorkflowStarted,
    WorkflowResumed,
    StepStart,
    StepComplete,
    StepFailed,
    StepRetry,
    ApprovalRequired,
    ApprovalGranted,
    ApprovalRejected,
    PhaseComplete,
    WorkflowPaused,
    WorkflowComplete,
    WorkflowFailed,
    GuardFailed,
    BudgetWarning,
}

impl EventKind {
    /// Events that close a `step_start` for the same step.
    pub fn ends_step(self) -> bool {
        matches!(self, Self::StepComplete | Self::StepFailed)
    }

    /// Events that end a run. Exactly one of these per run.
    pub fn ends_run(self) -> bool {
        matches!(
            self,
            Self::WorkflowComplete | Self::StepFailed | Self::GuardFailed | Self::WorkflowFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowResumed => "workflow_resumed",
            Self::StepStart => "step_start",
            Self::StepComplete => "step_complete",
            Self::StepFailed => "step_failed",
            Self::StepRetry => "step_retry",
            Self::ApprovalRequired => "approval_required",
            Self::ApprovalGranted => "approval_granted",
            Self::ApprovalRejected => "approval_rejected",
            Self::PhaseComplete => "phase_complete",
            Self::WorkflowPaused => "workflow_paused",
            Self::WorkflowComplete => "workflow_complete",
            Self::WorkflowFailed => "workflow_failed",
            Self::GuardFailed => "guard_failed",
            Self::BudgetWarning => "budget_warning",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored event with its log-assigned sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    /// Monotonic per run, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RunEvent {
    /// The `decision_id` carried by approval events, if any.
    pub fn decision_id(&self) -> Option<&str> {
        self.payload.get("decision_id").and_then(|v| v.as_str())
    }
}

/// An event before the log has sequenced it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRunEvent {
    pub run_id: Uuid,
    pub kind: EventKind,
    pub phase: Option<String>,
    pub step_id: Option<String>,
    pub payload: serde_json::Value,
}

impl NewRunEvent {
    pub fn new(run_id: Uuid, kind: EventKind) -> Self {
        Self {
            run_id,
            kind,
            phase: None,
            step_id: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Stamp with a sequence number and the current time.
    pub fn sequenced(self, seq: u64) -> RunEvent {
        RunEvent {
            run_id: self.run_id,
            seq,
            timestamp: Utc::now(),
            kind: self.kind,
            phase: self.phase,
            step_id: self.step_id,
            payload: self.payload,
        }
    }
}
