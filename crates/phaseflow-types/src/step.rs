//! Step executor result types.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Warning,
    Failure,
    NeedsInput,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Failure => write!(f, "failure"),
            Self::NeedsInput => write!(f, "needs_input"),
        }
    }
}

/// What a step executor reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepOutcome,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Resource units consumed by this execution, if metered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_units: Option<u64>,
}

impl StepResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self::with_status(StepOutcome::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::with_status(StepOutcome::Warning, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::with_status(StepOutcome::Failure, message)
    }

    pub fn needs_input(question: impl Into<String>) -> Self {
        Self::with_status(StepOutcome::NeedsInput, question)
    }

    pub fn with_cost(mut self, units: u64) -> Self {
        self.cost_units = Some(units);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    fn with_status(status: StepOutcome, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: serde_json::Value::Null,
            cost_units: None,
        }
    }
}
