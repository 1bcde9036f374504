//! `phaseflow workflows`: browse registered workflow definitions.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use phaseflow_core::workflow::resolver::resolve;
use phaseflow_types::workflow::ResolvedWorkflow;

use super::WorkflowAction;
use crate::state::AppState;

pub fn handle(state: &AppState, action: &WorkflowAction, json: bool) -> Result<()> {
    match action {
        WorkflowAction::List => list_workflows(state, json),
        WorkflowAction::Show { id } => show_workflow(state, id, json),
    }
}

fn list_workflows(state: &AppState, json: bool) -> Result<()> {
    let defs: Vec<_> = state
        .registry
        .ids()
        .into_iter()
        .filter_map(|id| state.registry.get(id))
        .collect();

    if json {
        let out: Vec<serde_json::Value> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id,
                    "version": d.version,
                    "extends": d.extends,
                    "description": d.description,
                    "phases": d.phases.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Id").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Extends"),
            Cell::new("Phases"),
            Cell::new("Description"),
        ]);

    for d in &defs {
        table.add_row(vec![
            Cell::new(&d.id),
            Cell::new(&d.version),
            Cell::new(d.extends.as_deref().unwrap_or("-")),
            Cell::new(d.phases.len()),
            Cell::new(d.description.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  Add definitions under {}",
        style(state.data_dir.join("workflows").display()).dim()
    );
    println!();

    Ok(())
}

fn show_workflow(state: &AppState, id: &str, json: bool) -> Result<()> {
    let resolved =
        resolve(id, &state.registry).with_context(|| format!("Failed to resolve workflow '{id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }

    print_resolved(&resolved);
    Ok(())
}

fn print_resolved(resolved: &ResolvedWorkflow) {
    println!();
    println!(
        "  {} v{}",
        style(&resolved.id).cyan().bold(),
        resolved.version
    );
    if let Some(description) = &resolved.description {
        println!("  {description}");
    }
    println!();
    println!("  Inherits:  {}", resolved.inheritance_chain.join(" -> "));
    if !resolved.arguments.is_empty() {
        let args: Vec<String> = resolved
            .arguments
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!("  Arguments: {}", args.join(", "));
    }
    println!(
        "  Steps:     {} in {} phases",
        resolved.step_count(),
        resolved.phases.len()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Phase").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("From"),
            Cell::new("Effects"),
            Cell::new("Approval"),
        ]);

    for phase in &resolved.phases {
        for (i, resolved_step) in phase.steps.iter().enumerate() {
            let first = i == 0;
            let effects: Vec<String> = resolved_step
                .step
                .effects
                .iter()
                .map(ToString::to_string)
                .collect();
            table.add_row(vec![
                Cell::new(if first { phase.name.as_str() } else { "" }),
                Cell::new(&resolved_step.step.id),
                Cell::new(&resolved_step.origin),
                Cell::new(effects.join(", ")),
                Cell::new(if first && phase.requires_approval {
                    "required"
                } else {
                    ""
                }),
            ]);
        }
    }

    println!("{table}");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaseflow_core::workflow::registry::{DefinitionRegistry, STANDARD_WORKFLOW_ID};
    use phaseflow_types::config::PhaseflowConfig;

    fn state() -> AppState {
        AppState {
            data_dir: std::env::temp_dir(),
            config: PhaseflowConfig::default(),
            registry: DefinitionRegistry::with_builtins().unwrap(),
        }
    }

    #[test]
    fn show_resolves_builtins() {
        let state = state();
        assert!(handle(&state, &WorkflowAction::Show { id: STANDARD_WORKFLOW_ID.into() }, true).is_ok());
        assert!(handle(&state, &WorkflowAction::List, true).is_ok());
    }

    #[test]
    fn show_unknown_workflow_fails() {
        let err = handle(&state(), &WorkflowAction::Show { id: "nope".into() }, true).unwrap_err();
        assert!(format!("{err:#}").contains("nope"));
    }
}
