//! `phaseflow run` and `phaseflow abort`.
//!
//! While a run is driven, events from the engine's bus are printed as they
//! are appended, so long steps show progress before the final report.

use anyhow::Result;
use console::style;
use phaseflow_core::engine::Engine;
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::event::{EventKind, RunEvent};
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

use super::print_report;

pub async fn run<C, L, P>(engine: &Engine<C, L, P>, run_id: Uuid, json: bool) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    let mut events = engine.subscribe();
    let drive = engine.run(run_id);
    tokio::pin!(drive);

    let result = loop {
        tokio::select! {
            result = &mut drive => break result,
            Ok(event) = events.recv() => {
                if !json {
                    print_event(&event);
                }
            }
        }
    };

    // Drain what was appended after the last poll.
    loop {
        match events.try_recv() {
            Ok(event) if !json => print_event(&event),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }

    let report = result?;
    print_report(&report, json)
}

pub async fn abort<C, L, P>(engine: &Engine<C, L, P>, run_id: Uuid, json: bool) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    let report = engine.abort(run_id).await?;
    print_report(&report, json)
}

/// One progress line per event worth showing.
fn print_event(event: &RunEvent) {
    if let Some(line) = event_line(event) {
        println!("{line}");
    }
}

fn event_line(event: &RunEvent) -> Option<String> {
    let step = event.step_id.as_deref().unwrap_or("-");
    let field = |key: &str| {
        event
            .payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let line = match event.kind {
        EventKind::WorkflowStarted => format!(
            "  {} Started {} for {}",
            style(">").cyan().bold(),
            field("workflow_id"),
            field("work_reference")
        ),
        EventKind::WorkflowResumed => format!("  {} Resumed", style(">").cyan().bold()),
        EventKind::StepStart => format!(
            "  {} {} {}",
            style("-").dim(),
            style(event.phase.as_deref().unwrap_or_default()).dim(),
            step
        ),
        EventKind::StepComplete => format!(
            "  {} {} {}",
            style("*").green().bold(),
            step,
            style(field("status")).dim()
        ),
        EventKind::StepRetry => format!(
            "  {} {} retrying: {}",
            style("~").yellow().bold(),
            step,
            field("reason")
        ),
        EventKind::StepFailed => format!(
            "  {} {} failed: {}",
            style("x").red().bold(),
            step,
            field("message")
        ),
        EventKind::PhaseComplete => format!(
            "  {} Phase {} complete",
            style("*").green().bold(),
            event.phase.as_deref().unwrap_or_default()
        ),
        EventKind::BudgetWarning => format!(
            "  {} Budget at {}%",
            style("!").yellow().bold(),
            event
                .payload
                .get("percent")
                .and_then(|v| v.as_u64())
                .unwrap_or_default()
        ),
        EventKind::GuardFailed => format!(
            "  {} Guard {} failed: {}",
            style("x").red().bold(),
            field("guard"),
            field("reason")
        ),
        EventKind::ApprovalGranted => format!(
            "  {} {} granted",
            style("*").green().bold(),
            event.decision_id().unwrap_or_default()
        ),
        EventKind::ApprovalRejected => format!(
            "  {} {} rejected",
            style("x").red().bold(),
            event.decision_id().unwrap_or_default()
        ),
        // The final report covers pauses and the terminal outcome.
        EventKind::ApprovalRequired
        | EventKind::WorkflowPaused
        | EventKind::WorkflowComplete
        | EventKind::WorkflowFailed => return None,
    };
    Some(line)
}
