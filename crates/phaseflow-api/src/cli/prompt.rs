//! Terminal decision channel for `phaseflow run --interactive`.
//!
//! Prompts on the controlling terminal when a gate needs a human. Choosing
//! "decide later" (or an empty answer) defers, and the engine pauses the run
//! exactly as it would without a channel.

use console::style;
use dialoguer::{Input, Select};
use phaseflow_core::decision::{DecisionChannel, DecisionError};
use phaseflow_types::decision::{Decision, DecisionKind, DecisionRequest};

use super::decision::actor;

const CHOICES: [&str; 3] = ["Approve", "Reject", "Decide later"];

#[derive(Debug, Clone)]
pub struct TerminalDecisionChannel {
    actor: String,
}

impl TerminalDecisionChannel {
    pub fn new() -> Self {
        Self { actor: actor() }
    }
}

impl Default for TerminalDecisionChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionChannel for TerminalDecisionChannel {
    async fn await_decision(&self, request: &DecisionRequest) -> Result<Decision, DecisionError> {
        let request = request.clone();
        let actor = self.actor.clone();
        // dialoguer blocks on stdin
        tokio::task::spawn_blocking(move || ask(&request, &actor))
            .await
            .map_err(|e| DecisionError::Io(e.to_string()))?
    }
}

fn ask(request: &DecisionRequest, actor: &str) -> Result<Decision, DecisionError> {
    let io = |e: dialoguer::Error| DecisionError::Io(e.to_string());

    println!();
    println!(
        "  {} {} required",
        style("?").yellow().bold(),
        style(request.kind).bold()
    );
    if let Some(location) = location(request) {
        println!("  {}", style(location).dim());
    }
    println!("  {}", request.question);
    println!();

    let id = request.decision_id.as_str();
    let decision = match request.kind {
        DecisionKind::Input => {
            let text = Input::<String>::new()
                .with_prompt("  Answer (empty to decide later)")
                .allow_empty(true)
                .interact_text()
                .map_err(io)?;
            let text = text.trim();
            if text.is_empty() {
                return Err(DecisionError::Deferred);
            }
            Decision::answer(id, text)
        }
        _ => {
            let selection = Select::new()
                .with_prompt("  Decision")
                .items(&CHOICES)
                .default(0)
                .interact()
                .map_err(io)?;
            match selection {
                0 => Decision::granted(id),
                1 => Decision::rejected(id),
                _ => return Err(DecisionError::Deferred),
            }
        }
    };

    Ok(decision.by(actor))
}

/// `phase / step` the request belongs to, when known.
fn location(request: &DecisionRequest) -> Option<String> {
    match (&request.phase, &request.step_id) {
        (Some(phase), Some(step)) => Some(format!("{phase} / {step}")),
        (Some(phase), None) => Some(phase.clone()),
        (None, Some(step)) => Some(step.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn location_combines_phase_and_step() {
        let mut request = DecisionRequest {
            decision_id: "phase:build".into(),
            kind: DecisionKind::PhaseApproval,
            question: "Start phase 'build'?".into(),
            phase: Some("build".into()),
            step_id: None,
            requested_at: Utc::now(),
        };
        assert_eq!(location(&request).as_deref(), Some("build"));

        request.step_id = Some("implement".into());
        assert_eq!(location(&request).as_deref(), Some("build / implement"));

        request.phase = None;
        request.step_id = None;
        assert_eq!(location(&request), None);
    }
}
