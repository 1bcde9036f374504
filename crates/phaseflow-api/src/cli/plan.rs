//! `phaseflow plan`: compile a workflow and submit it as a new run.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use phaseflow_core::engine::Engine;
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_core::workflow::compiler::{PlanOverrides, plan_fingerprint};
use phaseflow_types::plan::{AutonomyLevel, ExecutionPlan, WorkReference};

use crate::state::AppState;

pub async fn create_plan<C, L, P>(
    state: &AppState,
    engine: &Engine<C, L, P>,
    work_reference: WorkReference,
    workflow_id: Option<String>,
    autonomy: Option<AutonomyLevel>,
    arguments: BTreeMap<String, String>,
    json: bool,
) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    if let Some(id) = workflow_id
        .as_deref()
        .filter(|id| !state.registry.contains(id))
    {
        bail!(
            "Workflow '{id}' not found (known: {})",
            state.registry.ids().join(", ")
        );
    }

    let overrides = PlanOverrides {
        workflow_id,
        autonomy,
        arguments,
    };
    let plan = state
        .compiler()
        .plan(&state.registry, work_reference, &overrides)
        .context("Failed to compile plan")?;
    let report = engine.submit(&plan).await.context("Failed to store plan")?;

    tracing::info!(run_id = %plan.run_id, workflow_id = %plan.workflow_id, "plan submitted");

    if json {
        let out = serde_json::json!({
            "run_id": report.run_id,
            "status": report.status,
            "fingerprint": plan_fingerprint(&plan),
            "plan": plan,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_plan(&plan);
    println!(
        "  Start with: {}",
        style(format!("phaseflow run {}", plan.run_id)).dim()
    );
    println!();
    Ok(())
}

/// Render a plan: header, then one row per step.
pub fn print_plan(plan: &ExecutionPlan) {
    println!();
    println!(
        "  {} Planned run {}",
        style("*").green().bold(),
        style(plan.run_id).cyan().bold()
    );
    println!();
    println!("  Work:      {}", plan.work_reference);
    println!(
        "  Workflow:  {} v{} ({})",
        plan.workflow_id,
        plan.workflow_version,
        plan.inheritance_chain.join(" -> ")
    );
    println!("  Autonomy:  {}", plan.autonomy_level);
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Phase").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Action"),
            Cell::new("Approval"),
            Cell::new("Retries"),
        ]);

    for phase in &plan.phases {
        for (i, step) in phase.steps.iter().enumerate() {
            let first = i == 0;
            table.add_row(vec![
                Cell::new(if first { phase.name.as_str() } else { "" }),
                Cell::new(&step.id),
                Cell::new(truncate(&step.prompt, 60)),
                Cell::new(if first && plan.autonomy_level.gates_phase(phase.requires_approval) {
                    "required"
                } else {
                    ""
                }),
                Cell::new(if first { phase.max_retries.to_string() } else { String::new() }),
            ]);
        }
    }

    println!("{table}");
    println!();
}

fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}
