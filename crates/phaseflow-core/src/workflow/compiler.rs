//! Plan compiler: binds a resolved workflow to one unit of work.
//!
//! Compilation is deterministic. Two compilations of the same resolved
//! workflow, work reference, and overrides differ only in `plan_id`,
//! `run_id`, and `created_at`; [`plan_fingerprint`] ignores exactly those.

use std::collections::BTreeMap;

use chrono::Utc;
use phaseflow_types::plan::{
    AutonomyLevel, ExecutionPlan, OPERATION_MARKER, PlannedPhase, PlannedStep, StepPayload,
    WorkReference,
};
use phaseflow_types::workflow::{OutcomeAction, ResolvedStep, ResolvedWorkflow};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::EngineError;

use super::registry::{DefinitionRegistry, STANDARD_WORKFLOW_ID};
use super::resolver::resolve;

/// Caller-supplied overrides applied on top of the definition.
#[derive(Debug, Clone, Default)]
pub struct PlanOverrides {
    /// Compile this workflow instead of the default one.
    pub workflow_id: Option<String>,
    pub autonomy: Option<AutonomyLevel>,
    /// Extra placeholder bindings. These win over definition defaults.
    pub arguments: BTreeMap<String, String>,
}

/// Values used when neither the definition nor the overrides decide.
#[derive(Debug, Clone)]
pub struct CompilerDefaults {
    pub autonomy: AutonomyLevel,
    pub max_retries: u32,
}

impl Default for CompilerDefaults {
    fn default() -> Self {
        Self {
            autonomy: AutonomyLevel::default(),
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanCompiler {
    defaults: CompilerDefaults,
}

impl PlanCompiler {
    pub fn new(defaults: CompilerDefaults) -> Self {
        Self { defaults }
    }

    /// Resolve `overrides.workflow_id` (or `standard`) and compile it.
    pub fn plan(
        &self,
        registry: &DefinitionRegistry,
        work_reference: WorkReference,
        overrides: &PlanOverrides,
    ) -> Result<ExecutionPlan, EngineError> {
        let workflow_id = overrides
            .workflow_id
            .as_deref()
            .unwrap_or(STANDARD_WORKFLOW_ID);
        let resolved = resolve(workflow_id, registry)?;
        self.compile(&resolved, work_reference, overrides)
    }

    /// Compile a resolved workflow into an immutable plan.
    ///
    /// # Errors
    ///
    /// `Validation` when a step references an undefined placeholder, has an
    /// empty named-operation id, or declares a result policy that is not
    /// allowed (`on_failure` other than `stop`, `on_success: stop`,
    /// `on_needs_input: continue`).
    pub fn compile(
        &self,
        workflow: &ResolvedWorkflow,
        work_reference: WorkReference,
        overrides: &PlanOverrides,
    ) -> Result<ExecutionPlan, EngineError> {
        let bindings = bindings(workflow, &work_reference, overrides);

        let phases = workflow
            .phases
            .iter()
            .map(|phase| {
                let steps = phase
                    .steps
                    .iter()
                    .map(|step| compile_step(step, &bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PlannedPhase {
                    name: phase.name.clone(),
                    steps,
                    requires_approval: phase.requires_approval,
                    max_retries: phase.max_retries.unwrap_or(self.defaults.max_retries),
                })
            })
            .collect::<Result<Vec<_>, EngineError>>()?;

        let plan = ExecutionPlan {
            plan_id: Uuid::now_v7(),
            run_id: Uuid::now_v7(),
            work_reference,
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version.clone(),
            inheritance_chain: workflow.inheritance_chain.clone(),
            autonomy_level: overrides.autonomy.unwrap_or(self.defaults.autonomy),
            phases,
            created_at: Utc::now(),
        };

        tracing::info!(
            run_id = %plan.run_id,
            workflow_id = %plan.workflow_id,
            steps = plan.total_steps(),
            autonomy = %plan.autonomy_level,
            "compiled execution plan"
        );
        Ok(plan)
    }
}

/// SHA-256 over the plan's structure, excluding generated ids and timestamps.
pub fn plan_fingerprint(plan: &ExecutionPlan) -> String {
    let structural = serde_json::json!({
        "work_reference": plan.work_reference,
        "workflow_id": plan.workflow_id,
        "workflow_version": plan.workflow_version,
        "inheritance_chain": plan.inheritance_chain,
        "autonomy_level": plan.autonomy_level,
        "phases": plan.phases,
    });
    format!("{:x}", Sha256::digest(structural.to_string().as_bytes()))
}

// ---------------------------------------------------------------------------
// Binding
// ---------------------------------------------------------------------------

fn bindings(
    workflow: &ResolvedWorkflow,
    work_reference: &WorkReference,
    overrides: &PlanOverrides,
) -> BTreeMap<String, String> {
    let mut bound = BTreeMap::new();
    bound.insert("work_ref".to_string(), work_reference.to_string());
    bound.insert("workflow_id".to_string(), workflow.id.clone());
    match work_reference {
        WorkReference::Issue { id } => {
            bound.insert("issue_id".to_string(), id.clone());
        }
        WorkReference::Target { name } => {
            bound.insert("target".to_string(), name.clone());
        }
        WorkReference::None => {}
    }
    bound.extend(workflow.arguments.clone());
    bound.extend(overrides.arguments.clone());
    bound
}

fn compile_step(
    resolved: &ResolvedStep,
    bindings: &BTreeMap<String, String>,
) -> Result<PlannedStep, EngineError> {
    let step = &resolved.step;
    check_result_handling(resolved)?;

    let prompt = substitute(&step.prompt, bindings, &step.id)?;
    let context = step
        .context
        .as_deref()
        .map(|c| substitute(c, bindings, &step.id))
        .transpose()?;
    let arguments = step
        .arguments
        .iter()
        .map(|(k, v)| Ok((k.clone(), substitute(v, bindings, &step.id)?)))
        .collect::<Result<BTreeMap<_, _>, EngineError>>()?;

    let payload = payload_for(&prompt, context.clone(), &step.id)?;

    Ok(PlannedStep {
        id: step.id.clone(),
        name: step.display_name().to_string(),
        prompt,
        context,
        payload,
        arguments,
        effects: step.effects.clone(),
        result_handling: step.result_handling,
        origin: resolved.origin.clone(),
    })
}

fn check_result_handling(resolved: &ResolvedStep) -> Result<(), EngineError> {
    let step = &resolved.step;
    let policy = step.result_handling;
    let reject = |field: &str, action: OutcomeAction| {
        Err(EngineError::Validation(format!(
            "step '{}' (from '{}'): {field} cannot be '{action}'",
            step.id, resolved.origin
        )))
    };

    if policy.on_failure != OutcomeAction::Stop {
        return reject("on_failure", policy.on_failure);
    }
    if policy.on_success == OutcomeAction::Stop {
        return reject("on_success", policy.on_success);
    }
    if policy.on_needs_input == OutcomeAction::Continue {
        return reject("on_needs_input", policy.on_needs_input);
    }
    Ok(())
}

/// Classify the bound prompt. The variant is final; executors never
/// re-inspect the text.
fn payload_for(
    prompt: &str,
    context: Option<String>,
    step_id: &str,
) -> Result<StepPayload, EngineError> {
    let trimmed = prompt.trim_start();
    match trimmed.strip_prefix(OPERATION_MARKER) {
        Some(rest) => {
            let mut parts = rest.split_whitespace();
            let id = parts.next().unwrap_or_default();
            if id.is_empty() {
                return Err(EngineError::Validation(format!(
                    "step '{step_id}' has an empty operation name"
                )));
            }
            Ok(StepPayload::NamedOperation {
                id: id.to_string(),
                args: parts.map(str::to_string).collect(),
            })
        }
        None => Ok(StepPayload::FreeformInstruction {
            text: prompt.to_string(),
            context,
        }),
    }
}

/// Replace every `{{name}}` with its binding.
fn substitute(
    template: &str,
    bindings: &BTreeMap<String, String>,
    step_id: &str,
) -> Result<String, EngineError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| {
            EngineError::Validation(format!(
                "step '{step_id}' has an unterminated placeholder in '{template}'"
            ))
        })?;
        let name = after[..end].trim();
        let value = bindings.get(name).ok_or_else(|| {
            EngineError::Validation(format!(
                "step '{step_id}' references undefined argument '{{{{{name}}}}}'"
            ))
        })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
