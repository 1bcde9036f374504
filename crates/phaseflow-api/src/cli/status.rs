//! `phaseflow status` and `phaseflow events`: inspect runs.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use phaseflow_core::engine::Engine;
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::event::RunEvent;
use phaseflow_types::run::{RunState, RunStatus, StepStatus};
use uuid::Uuid;

/// Show one run: summary, pending decision or failure, per-step progress.
pub async fn show_run<C, L, P>(engine: &Engine<C, L, P>, run_id: Uuid, json: bool) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    let state = engine.status(run_id).await?;
    let plan = engine.plan(run_id).await?;

    if json {
        let out = serde_json::json!({
            "state": state,
            "workflow_id": plan.workflow_id,
            "work_reference": plan.work_reference,
            "autonomy_level": plan.autonomy_level,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Run {}",
        status_badge(state.status),
        style(run_id).cyan().bold()
    );
    println!();
    println!("  Status:    {}", state.status);
    println!("  Work:      {}", plan.work_reference);
    println!("  Workflow:  {} ({})", plan.workflow_id, plan.autonomy_level);
    if let Some(phase) = &state.current_phase {
        let step = state.current_step.as_deref().unwrap_or("-");
        println!("  Position:  {phase} / {step}");
    }
    println!(
        "  Progress:  {}/{} steps",
        state.completed_steps(),
        state.total_steps()
    );
    println!("  Budget:    {}", budget_line(&state));
    println!(
        "  Updated:   {}",
        state.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    if let Some(request) = &state.pending_decision {
        println!();
        println!(
            "  {} Waiting on {} ({})",
            style("?").yellow().bold(),
            style(&request.decision_id).bold(),
            request.kind
        );
        println!("  {}", request.question);
    }
    if let Some(failure) = &state.failure {
        println!();
        println!(
            "  {} {}: {}",
            style("x").red().bold(),
            failure.kind,
            failure.reason
        );
        if let Some(step_id) = &failure.step_id {
            println!("  at step {step_id}");
        }
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Phase").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Retries"),
        ]);

    for phase in &state.phases {
        for (i, step) in phase.steps.iter().enumerate() {
            let first = i == 0;
            table.add_row(vec![
                Cell::new(if first { phase.name.as_str() } else { "" }),
                Cell::new(&step.step_id),
                Cell::new(step.status).fg(step_color(step.status)),
                Cell::new(step.attempts),
                Cell::new(if first {
                    phase.retries_used.to_string()
                } else {
                    String::new()
                }),
            ]);
        }
    }

    println!("{table}");
    println!();
    println!(
        "  Events: {}",
        style(format!("phaseflow events {run_id}")).dim()
    );
    println!();

    Ok(())
}

/// List every stored run, most recently updated first.
pub async fn list_runs<C, L, P>(engine: &Engine<C, L, P>, json: bool) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    let runs = engine.list_runs().await?;

    if json {
        let out: Vec<serde_json::Value> = runs
            .iter()
            .map(|run| {
                serde_json::json!({
                    "run_id": run.run_id,
                    "status": run.status,
                    "current_phase": run.current_phase,
                    "completed_steps": run.completed_steps(),
                    "total_steps": run.total_steps(),
                    "updated_at": run.updated_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!();
        println!("  No runs yet.");
        println!(
            "  Plan one with: {}",
            style("phaseflow plan <work-ref>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Phase"),
            Cell::new("Progress"),
            Cell::new("Updated"),
        ]);

    for run in &runs {
        table.add_row(vec![
            Cell::new(run.run_id),
            Cell::new(run.status).fg(run_color(run.status)),
            Cell::new(run.current_phase.as_deref().unwrap_or("-")),
            Cell::new(format!("{}/{}", run.completed_steps(), run.total_steps())),
            Cell::new(run.updated_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

/// Print a run's audit events after `since`.
pub async fn list_events<C, L, P>(
    engine: &Engine<C, L, P>,
    run_id: Uuid,
    since: u64,
    json: bool,
) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    // Distinguish an unknown run from one with no new events.
    engine.status(run_id).await?;
    let events = engine.events(run_id, since).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!();
        println!("  No events after seq {since}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Seq").fg(Color::Cyan),
            Cell::new("Time"),
            Cell::new("Event"),
            Cell::new("Phase"),
            Cell::new("Step"),
            Cell::new("Detail"),
        ]);

    for event in &events {
        table.add_row(vec![
            Cell::new(event.seq),
            Cell::new(event.timestamp.format("%H:%M:%S").to_string()),
            Cell::new(event.kind),
            Cell::new(event.phase.as_deref().unwrap_or("")),
            Cell::new(event.step_id.as_deref().unwrap_or("")),
            Cell::new(detail(event)),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

fn budget_line(state: &RunState) -> String {
    let budget = &state.budget;
    match budget.ceiling {
        Some(ceiling) => format!(
            "{} of {ceiling} units ({}%)",
            budget.consumed_units,
            budget.percent_used().unwrap_or_default()
        ),
        None => format!("{} units (unmetered)", budget.consumed_units),
    }
}

/// Payload as compact JSON, capped for table width.
fn detail(event: &RunEvent) -> String {
    if event.payload.is_null() {
        return String::new();
    }
    let text = event.payload.to_string();
    if text.chars().count() > 80 {
        let cut: String = text.chars().take(77).collect();
        format!("{cut}...")
    } else {
        text
    }
}

fn status_badge(status: RunStatus) -> console::StyledObject<&'static str> {
    match status {
        RunStatus::Completed => style("*").green().bold(),
        RunStatus::Failed => style("x").red().bold(),
        RunStatus::Paused => style("?").yellow().bold(),
        RunStatus::Pending | RunStatus::Running => style("*").cyan().bold(),
    }
}

fn run_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Completed => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Paused => Color::Yellow,
        RunStatus::Pending | RunStatus::Running => Color::Reset,
    }
}

fn step_color(status: StepStatus) -> Color {
    match status {
        StepStatus::Completed => Color::Green,
        StepStatus::Failed => Color::Red,
        StepStatus::InProgress => Color::Yellow,
        StepStatus::Pending => Color::Reset,
    }
}
