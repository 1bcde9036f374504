//! Workflow inheritance resolver.
//!
//! Walks `extends` links from the requested workflow up to its root, then
//! merges root-first:
//! - a child phase with an existing name extends that phase (steps appended,
//!   `max_retries` / `requires_approval` overridden when set)
//! - a child phase with a new name is appended
//! - a child step whose id already exists replaces that step in place,
//!   wherever it lives, and records the child as its origin

use std::collections::HashSet;

use phaseflow_types::workflow::{
    ResolvedPhase, ResolvedStep, ResolvedWorkflow, StepDefinition, WorkflowDefinition,
};

use crate::error::EngineError;

use super::registry::DefinitionRegistry;

/// Resolve `workflow_id` against the registry.
///
/// # Errors
///
/// - `UnknownWorkflow` when the id or any ancestor is not registered.
/// - `CyclicInheritance` with the offending chain (`a -> b -> a`).
/// - `Validation` if the merged result has duplicate step ids.
pub fn resolve(
    workflow_id: &str,
    registry: &DefinitionRegistry,
) -> Result<ResolvedWorkflow, EngineError> {
    let chain = ancestor_chain(workflow_id, registry)?;

    let mut phases: Vec<ResolvedPhase> = Vec::new();
    let mut arguments = Default::default();
    for definition in &chain {
        merge_definition(&mut phases, definition);
        merge_arguments(&mut arguments, definition);
    }

    let leaf = chain
        .last()
        .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.to_string()))?;

    let resolved = ResolvedWorkflow {
        id: leaf.id.clone(),
        version: leaf.version.clone(),
        description: leaf.description.clone(),
        inheritance_chain: chain.iter().map(|d| d.id.clone()).collect(),
        arguments,
        phases,
    };
    check_unique_step_ids(&resolved)?;

    tracing::debug!(
        workflow_id,
        chain = ?resolved.inheritance_chain,
        steps = resolved.step_count(),
        "resolved workflow"
    );
    Ok(resolved)
}

/// Definitions from root to `workflow_id`.
fn ancestor_chain<'r>(
    workflow_id: &str,
    registry: &'r DefinitionRegistry,
) -> Result<Vec<&'r WorkflowDefinition>, EngineError> {
    let mut chain: Vec<&WorkflowDefinition> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut next = Some(workflow_id);

    while let Some(id) = next {
        if !visited.insert(id) {
            // Report leaf-to-root order up to and including the repeated id.
            let mut cycle: Vec<String> = chain.iter().map(|d| d.id.clone()).collect();
            cycle.push(id.to_string());
            return Err(EngineError::CyclicInheritance(cycle));
        }
        let definition = registry
            .get(id)
            .ok_or_else(|| EngineError::UnknownWorkflow(id.to_string()))?;
        chain.push(definition);
        next = definition.extends.as_deref();
    }

    chain.reverse();
    Ok(chain)
}

fn merge_definition(phases: &mut Vec<ResolvedPhase>, definition: &WorkflowDefinition) {
    for phase_def in &definition.phases {
        let phase_index = match phases.iter().position(|p| p.name == phase_def.name) {
            Some(index) => {
                let phase = &mut phases[index];
                if let Some(max_retries) = phase_def.max_retries {
                    phase.max_retries = Some(max_retries);
                }
                if let Some(requires_approval) = phase_def.requires_approval {
                    phase.requires_approval = requires_approval;
                }
                index
            }
            None => {
                phases.push(ResolvedPhase {
                    name: phase_def.name.clone(),
                    max_retries: phase_def.max_retries,
                    requires_approval: phase_def.requires_approval.unwrap_or(false),
                    steps: Vec::new(),
                });
                phases.len() - 1
            }
        };

        for step in &phase_def.steps {
            merge_step(phases, phase_index, step, &definition.id);
        }
    }
}

fn merge_step(
    phases: &mut [ResolvedPhase],
    phase_index: usize,
    step: &StepDefinition,
    origin: &str,
) {
    let resolved = ResolvedStep {
        step: step.clone(),
        origin: origin.to_string(),
    };

    let existing = phases.iter_mut().find_map(|phase| {
        phase
            .steps
            .iter_mut()
            .find(|s| s.step.id == step.id)
    });

    match existing {
        Some(slot) => {
            tracing::debug!(
                step_id = %step.id,
                from = %slot.origin,
                to = origin,
                "step overridden"
            );
            *slot = resolved;
        }
        None => phases[phase_index].steps.push(resolved),
    }
}

fn merge_arguments(
    arguments: &mut std::collections::BTreeMap<String, String>,
    definition: &WorkflowDefinition,
) {
    for (key, value) in &definition.arguments {
        arguments.insert(key.clone(), value.clone());
    }
}

fn check_unique_step_ids(resolved: &ResolvedWorkflow) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for phase in &resolved.phases {
        for step in &phase.steps {
            if !seen.insert(step.step.id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "workflow '{}' resolves to duplicate step id '{}'",
                    resolved.id, step.step.id
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
