//! `phaseflow approve | reject | answer`: record a human decision.

use anyhow::Result;
use phaseflow_core::engine::Engine;
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::decision::Decision;
use uuid::Uuid;

use super::print_report;

/// Who is deciding: `$USER`, else `cli`.
pub fn actor() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.trim().is_empty())
        .unwrap_or_else(|| "cli".to_string())
}

/// Attach an optional note as the decision's response text.
pub fn with_note(mut decision: Decision, note: Option<String>) -> Decision {
    if let Some(note) = note.filter(|n| !n.trim().is_empty()) {
        decision.response = Some(note);
    }
    decision
}

/// Record `decision` against the run's pending request.
///
/// A grant leaves the run paused until the next `phaseflow run`; a
/// rejection fails it.
pub async fn decide<C, L, P>(
    engine: &Engine<C, L, P>,
    run_id: Uuid,
    decision: Decision,
    json: bool,
) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    let report = engine
        .record_decision(run_id, decision.by(actor()))
        .await?;
    print_report(&report, json)
}
