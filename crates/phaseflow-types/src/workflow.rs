//! Workflow definition types for phaseflow.
//!
//! A `WorkflowDefinition` is the authored YAML document: named phases, each
//! holding ordered steps, optionally extending a parent definition. The
//! resolver in phaseflow-core merges an inheritance chain into a
//! `ResolvedWorkflow`, which is what the plan compiler consumes.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;

// ---------------------------------------------------------------------------
// Workflow Definition (authored document)
// ---------------------------------------------------------------------------

/// A named, versioned workflow document as loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Registry key (e.g. "standard", "hotfix").
    pub id: String,
    /// Free-form version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Parent definition id this workflow inherits from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Default values for `{{placeholder}}` arguments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
    /// Ordered phases. In a child definition, a phase whose name matches a
    /// parent phase extends it; any other phase is appended.
    #[serde(default)]
    pub phases: Vec<PhaseDefinition>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl WorkflowDefinition {
    /// Parse and validate a definition from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        let def: Self =
            serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
        def.validate()?;
        Ok(def)
    }

    /// Structural checks that apply to a single document, before inheritance.
    ///
    /// Phase names and step ids must be unique inside the document. Step ids
    /// are unique across phases, not just within one.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let invalid = |reason: String| DefinitionError::Invalid {
            workflow: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("workflow id must not be empty".into()));
        }
        if self.extends.as_deref() == Some(self.id.as_str()) {
            return Err(invalid("a workflow cannot extend itself".into()));
        }

        let mut phase_names = HashSet::new();
        let mut step_ids = HashSet::new();
        for phase in &self.phases {
            if phase.name.trim().is_empty() {
                return Err(invalid("phase name must not be empty".into()));
            }
            if !phase_names.insert(phase.name.as_str()) {
                return Err(invalid(format!("duplicate phase '{}'", phase.name)));
            }
            for step in &phase.steps {
                if step.id.trim().is_empty() {
                    return Err(invalid(format!(
                        "phase '{}' has a step with an empty id",
                        phase.name
                    )));
                }
                if !step_ids.insert(step.id.as_str()) {
                    return Err(invalid(format!("duplicate step id '{}'", step.id)));
                }
            }
        }
        Ok(())
    }
}

/// One phase of an authored definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub name: String,
    /// Retry ceiling shared by all steps of the phase. `None` inherits from
    /// the parent definition, then from the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_approval: Option<bool>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// The atomic unit of work inside a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Stable id, unique within a resolved workflow.
    pub id: String,
    /// Human-readable name. Defaults to the id when omitted.
    #[serde(default)]
    pub name: String,
    /// Raw payload. A leading `/` marks a named operation
    /// (`/open-pr {{issue_id}}`); anything else is a free-form instruction.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Named argument templates handed to the executor after binding.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, String>,
    /// Side-effect classes, used to select guards and budget checks.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub effects: BTreeSet<StepEffect>,
    #[serde(default)]
    pub result_handling: ResultHandling,
}

impl StepDefinition {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    pub fn has_effect(&self, effect: StepEffect) -> bool {
        self.effects.contains(&effect)
    }
}

/// Side-effect classes a step may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEffect {
    /// Writes commits to version control.
    Commit,
    /// Merges a branch or pull request.
    Merge,
    /// Deletes a branch, file set, or remote resource.
    Delete,
    /// Closes a work item.
    Close,
    /// Consumes metered resources (model calls, paid APIs).
    CostBearing,
}

impl StepEffect {
    /// Effects that touch version control and therefore need Branch Safety.
    pub fn touches_vcs(self) -> bool {
        matches!(self, Self::Commit | Self::Merge)
    }

    /// Effects that need an explicit approval before they run.
    pub fn is_destructive(self) -> bool {
        matches!(self, Self::Merge | Self::Delete | Self::Close)
    }
}

impl fmt::Display for StepEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Merge => write!(f, "merge"),
            Self::Delete => write!(f, "delete"),
            Self::Close => write!(f, "close"),
            Self::CostBearing => write!(f, "cost_bearing"),
        }
    }
}

/// What to do with each executor outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultHandling {
    #[serde(default = "OutcomeAction::continue_")]
    pub on_success: OutcomeAction,
    #[serde(default = "OutcomeAction::prompt")]
    pub on_warning: OutcomeAction,
    #[serde(default = "OutcomeAction::prompt")]
    pub on_needs_input: OutcomeAction,
    /// Must be `stop`; anything else is rejected at compile time.
    #[serde(default = "OutcomeAction::stop")]
    pub on_failure: OutcomeAction,
}

impl Default for ResultHandling {
    fn default() -> Self {
        Self {
            on_success: OutcomeAction::Continue,
            on_warning: OutcomeAction::Prompt,
            on_needs_input: OutcomeAction::Prompt,
            on_failure: OutcomeAction::Stop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeAction {
    Continue,
    Prompt,
    Stop,
}

impl OutcomeAction {
    fn continue_() -> Self {
        Self::Continue
    }

    fn prompt() -> Self {
        Self::Prompt
    }

    fn stop() -> Self {
        Self::Stop
    }
}

impl fmt::Display for OutcomeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Prompt => write!(f, "prompt"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolved Workflow (after inheritance)
// ---------------------------------------------------------------------------

/// A definition with its inheritance chain fully materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedWorkflow {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ancestor ids, root first, ending with `id`.
    pub inheritance_chain: Vec<String>,
    /// Argument defaults merged along the chain (child wins).
    pub arguments: BTreeMap<String, String>,
    pub phases: Vec<ResolvedPhase>,
}

impl ResolvedWorkflow {
    pub fn step_count(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPhase {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    pub requires_approval: bool,
    pub steps: Vec<ResolvedStep>,
}

/// A step plus the definition that supplied its winning version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStep {
    #[serde(flatten)]
    pub step: StepDefinition,
    pub origin: String,
}
