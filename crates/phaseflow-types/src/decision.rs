//! Human decision records.
//!
//! Every pause is keyed by a decision id. Phase approvals, budget approvals,
//! destructive-operation approvals, outcome prompts and input requests all
//! share one queue; the `kind` only shapes how a channel renders the question.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    PhaseApproval,
    BudgetApproval,
    DestructiveApproval,
    WarningPrompt,
    SuccessPrompt,
    /// Free-text answer requested by a step reporting `needs_input`.
    Input,
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhaseApproval => write!(f, "phase approval"),
            Self::BudgetApproval => write!(f, "budget approval"),
            Self::DestructiveApproval => write!(f, "destructive-operation approval"),
            Self::WarningPrompt => write!(f, "warning review"),
            Self::SuccessPrompt => write!(f, "result review"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// A pending question recorded in `RunState` while a run is paused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub decision_id: String,
    pub kind: DecisionKind,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Granted,
    Rejected,
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Granted => write!(f, "granted"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// The answer to a `DecisionRequest`, from whichever channel produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: String,
    pub outcome: DecisionOutcome,
    /// Free text: the answer for input requests, a note otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn granted(decision_id: impl Into<String>) -> Self {
        Self {
            decision_id: decision_id.into(),
            outcome: DecisionOutcome::Granted,
            response: None,
            decided_by: None,
            decided_at: Utc::now(),
        }
    }

    pub fn rejected(decision_id: impl Into<String>) -> Self {
        Self {
            outcome: DecisionOutcome::Rejected,
            ..Self::granted(decision_id)
        }
    }

    /// A granted decision carrying a free-text answer.
    pub fn answer(decision_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
            ..Self::granted(decision_id)
        }
    }

    pub fn by(mut self, who: impl Into<String>) -> Self {
        self.decided_by = Some(who.into());
        self
    }

    pub fn is_granted(&self) -> bool {
        self.outcome == DecisionOutcome::Granted
    }
}
