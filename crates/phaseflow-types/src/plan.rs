//! Execution plan types.
//!
//! An `ExecutionPlan` is a resolved workflow bound to one unit of work. It is
//! compiled once per run and never mutated afterwards; the engine only reads
//! it. Serialized as the run's `plan.json` document.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{ResultHandling, StepEffect};

// ---------------------------------------------------------------------------
// Work reference
// ---------------------------------------------------------------------------

/// The unit of work a plan is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkReference {
    /// A work-tracking item (issue, ticket).
    Issue { id: String },
    /// A named target (service, package, environment).
    Target { name: String },
    None,
}

impl fmt::Display for WorkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issue { id } => write!(f, "issue:{id}"),
            Self::Target { name } => write!(f, "target:{name}"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Accepts `issue:<id>`, `target:<name>`, `#<id>`, a bare number (issue),
/// `none`/`-`, or any other bare word (target).
impl FromStr for WorkReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "-" || s.eq_ignore_ascii_case("none") {
            return Ok(Self::None);
        }
        if let Some(id) = s.strip_prefix("issue:").or_else(|| s.strip_prefix('#')) {
            if id.is_empty() {
                return Err(format!("empty issue id in '{s}'"));
            }
            return Ok(Self::Issue { id: id.to_string() });
        }
        if let Some(name) = s.strip_prefix("target:") {
            if name.is_empty() {
                return Err(format!("empty target name in '{s}'"));
            }
            return Ok(Self::Target {
                name: name.to_string(),
            });
        }
        if s.chars().all(|c| c.is_ascii_digit()) {
            return Ok(Self::Issue { id: s.to_string() });
        }
        Ok(Self::Target {
            name: s.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Autonomy
// ---------------------------------------------------------------------------

/// Degree of human oversight for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Every phase is gated behind an approval.
    Manual,
    /// Only phases flagged `requires_approval` are gated.
    #[default]
    Supervised,
    /// No phase gates. Budget and destructive-operation gates still apply.
    Autonomous,
}

impl AutonomyLevel {
    /// Whether entering a phase with the given flag needs an approval.
    pub fn gates_phase(self, requires_approval: bool) -> bool {
        match self {
            Self::Manual => true,
            Self::Supervised => requires_approval,
            Self::Autonomous => false,
        }
    }
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Supervised => write!(f, "supervised"),
            Self::Autonomous => write!(f, "autonomous"),
        }
    }
}

impl FromStr for AutonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "supervised" => Ok(Self::Supervised),
            "autonomous" => Ok(Self::Autonomous),
            other => Err(format!(
                "unknown autonomy level '{other}' (expected manual, supervised, or autonomous)"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Step payload
// ---------------------------------------------------------------------------

/// Marker that distinguishes a named operation from free-form text.
pub const OPERATION_MARKER: char = '/';

/// What the executor is asked to do, fixed at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepPayload {
    NamedOperation {
        id: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
    FreeformInstruction {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },
}

impl StepPayload {
    pub fn is_named_operation(&self) -> bool {
        matches!(self, Self::NamedOperation { .. })
    }
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: Uuid,
    pub run_id: Uuid,
    pub work_reference: WorkReference,
    pub workflow_id: String,
    pub workflow_version: String,
    /// Root first, ending with `workflow_id`.
    pub inheritance_chain: Vec<String>,
    pub autonomy_level: AutonomyLevel,
    pub phases: Vec<PlannedPhase>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn total_steps(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }

    pub fn phase(&self, name: &str) -> Option<&PlannedPhase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Locate a step by id as `(phase_index, step_index)`.
    pub fn position_of(&self, step_id: &str) -> Option<(usize, usize)> {
        self.phases.iter().enumerate().find_map(|(pi, phase)| {
            phase
                .steps
                .iter()
                .position(|s| s.id == step_id)
                .map(|si| (pi, si))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPhase {
    pub name: String,
    pub steps: Vec<PlannedStep>,
    pub requires_approval: bool,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub id: String,
    pub name: String,
    /// The prompt with placeholders bound.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub payload: StepPayload,
    #[serde(default)]
    pub arguments: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub effects: BTreeSet<StepEffect>,
    pub result_handling: ResultHandling,
    /// Definition id that supplied this step.
    pub origin: String,
}

impl PlannedStep {
    pub fn has_effect(&self, effect: StepEffect) -> bool {
        self.effects.contains(&effect)
    }

    pub fn touches_vcs(&self) -> bool {
        self.effects.iter().any(|e| e.touches_vcs())
    }

    pub fn is_destructive(&self) -> bool {
        self.effects.iter().any(|e| e.is_destructive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_reference_parsing() {
        assert_eq!(
            "issue:PROJ-12".parse::<WorkReference>().unwrap(),
            WorkReference::Issue { id: "PROJ-12".into() }
        );
        assert_eq!(
            "#42".parse::<WorkReference>().unwrap(),
            WorkReference::Issue { id: "42".into() }
        );
        assert_eq!(
            "42".parse::<WorkReference>().unwrap(),
            WorkReference::Issue { id: "42".into() }
        );
        assert_eq!(
            "billing-api".parse::<WorkReference>().unwrap(),
            WorkReference::Target { name: "billing-api".into() }
        );
        assert_eq!("none".parse::<WorkReference>().unwrap(), WorkReference::None);
        assert!("issue:".parse::<WorkReference>().is_err());
    }

    #[test]
    fn work_reference_display_round_trips_prefixed_form() {
        let r = WorkReference::Target { name: "web".into() };
        assert_eq!(r.to_string().parse::<WorkReference>().unwrap(), r);
    }

    #[test]
    fn autonomy_gates() {
        assert!(AutonomyLevel::Manual.gates_phase(false));
        assert!(AutonomyLevel::Supervised.gates_phase(true));
        assert!(!AutonomyLevel::Supervised.gates_phase(false));
        assert!(!AutonomyLevel::Autonomous.gates_phase(true));
        assert_eq!(AutonomyLevel::default(), AutonomyLevel::Supervised);
        assert!("sometimes".parse::<AutonomyLevel>().is_err());
    }

    #[test]
    fn payload_serializes_tagged() {
        let p = StepPayload::NamedOperation {
            id: "open-pr".into(),
            args: vec!["42".into()],
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["kind"], "named_operation");
        assert_eq!(json["id"], "open-pr");
        assert!(p.is_named_operation());
    }
}
