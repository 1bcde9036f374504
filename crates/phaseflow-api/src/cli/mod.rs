//! CLI command definitions and dispatch for the `phaseflow` binary.
//!
//! Uses clap derive macros for argument parsing. Run commands take the run
//! id printed by `phaseflow plan`; decision commands also take the decision
//! id printed when a run pauses.

pub mod decision;
pub mod plan;
pub mod prompt;
pub mod run;
pub mod status;
pub mod workflows;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use phaseflow_core::engine::{Engine, RunReport};
use phaseflow_core::error::{EXIT_FAILURE, EngineError};
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::config::StorageBackend;
use phaseflow_types::decision::{Decision, DecisionKind};
use phaseflow_types::plan::{AutonomyLevel, WorkReference};
use phaseflow_types::run::RunStatus;
use uuid::Uuid;

use crate::state::AppState;

/// Drive work through frame, architect, build, evaluate and release.
#[derive(Parser)]
#[command(name = "phaseflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory (default: $PHASEFLOW_DATA_DIR or ~/.phaseflow).
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Run store to use, overriding config (file or sqlite).
    #[arg(long, global = true, value_name = "BACKEND")]
    pub backend: Option<StorageBackend>,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a workflow for a unit of work and store it as a new run.
    Plan {
        /// Work reference: issue:<id>, #<id>, target:<name>, or none.
        work_ref: WorkReference,

        /// Workflow to compile (default: standard).
        #[arg(short, long)]
        workflow: Option<String>,

        /// Autonomy level: manual, supervised, or autonomous.
        #[arg(short, long)]
        autonomy: Option<AutonomyLevel>,

        /// Placeholder binding, repeatable.
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        args: Vec<(String, String)>,
    },

    /// Start or resume a run until it completes, pauses, or fails.
    #[command(alias = "resume")]
    Run {
        run_id: Uuid,

        /// Answer approvals and questions on the terminal instead of pausing.
        #[arg(short, long)]
        interactive: bool,
    },

    /// Abort a run that has not finished.
    Abort { run_id: Uuid },

    /// Grant the decision a paused run is waiting on.
    Approve {
        run_id: Uuid,
        decision_id: String,

        /// Note recorded with the decision.
        #[arg(long)]
        note: Option<String>,
    },

    /// Reject the decision a paused run is waiting on. Fails the run.
    Reject {
        run_id: Uuid,
        decision_id: String,

        /// Note recorded with the decision.
        #[arg(long)]
        note: Option<String>,
    },

    /// Answer a question a paused run is waiting on.
    Answer {
        run_id: Uuid,
        decision_id: String,
        text: String,
    },

    /// Show one run in detail, or list all runs.
    Status { run_id: Option<Uuid> },

    /// Show a run's audit events.
    Events {
        run_id: Uuid,

        /// Only events with a sequence number greater than this.
        #[arg(long, default_value_t = 0)]
        since: u64,
    },

    /// Browse workflow definitions.
    #[command(alias = "wf")]
    Workflows {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// List registered workflow definitions.
    #[command(alias = "ls")]
    List,

    /// Show a workflow with its inheritance resolved.
    Show {
        /// Workflow id.
        id: String,
    },
}

/// Parse a `KEY=VALUE` pair.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run a command that needs the engine.
pub async fn dispatch<C, L, P>(
    state: &AppState,
    engine: &Engine<C, L, P>,
    command: Commands,
    json: bool,
) -> Result<()>
where
    C: CheckpointStore,
    L: EventLog,
    P: PlanStore,
{
    match command {
        Commands::Plan {
            work_ref,
            workflow,
            autonomy,
            args,
        } => {
            plan::create_plan(
                state,
                engine,
                work_ref,
                workflow,
                autonomy,
                args.into_iter().collect(),
                json,
            )
            .await
        }
        Commands::Run { run_id, .. } => run::run(engine, run_id, json).await,
        Commands::Abort { run_id } => run::abort(engine, run_id, json).await,
        Commands::Approve {
            run_id,
            decision_id,
            note,
        } => {
            let decision = decision::with_note(Decision::granted(decision_id), note);
            decision::decide(engine, run_id, decision, json).await
        }
        Commands::Reject {
            run_id,
            decision_id,
            note,
        } => {
            let decision = decision::with_note(Decision::rejected(decision_id), note);
            decision::decide(engine, run_id, decision, json).await
        }
        Commands::Answer {
            run_id,
            decision_id,
            text,
        } => decision::decide(engine, run_id, Decision::answer(decision_id, text), json).await,
        Commands::Status { run_id: Some(run_id) } => status::show_run(engine, run_id, json).await,
        Commands::Status { run_id: None } => status::list_runs(engine, json).await,
        Commands::Events { run_id, since } => status::list_events(engine, run_id, since, json).await,
        Commands::Workflows { action } => workflows::handle(state, &action, json),
        Commands::Completions { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Shared output
// ---------------------------------------------------------------------------

/// Print where a run stands after the engine returned control.
pub fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let run_id = report.run_id;
    println!();
    match report.status {
        RunStatus::Completed => {
            println!(
                "  {} Run {} completed ({}/{} steps)",
                style("*").green().bold(),
                style(run_id).cyan(),
                report.completed_steps,
                report.total_steps,
            );
        }
        RunStatus::Paused => match &report.pending_decision {
            Some(request) => {
                println!(
                    "  {} Run {} paused: {} needed",
                    style("?").yellow().bold(),
                    style(run_id).cyan(),
                    request.kind,
                );
                println!();
                println!("  {}", request.question);
                println!("  Decision: {}", style(&request.decision_id).bold());
                println!();
                if request.kind == DecisionKind::Input {
                    println!(
                        "  Answer with: {}",
                        style(format!(
                            "phaseflow answer {run_id} {} \"<text>\"",
                            request.decision_id
                        ))
                        .dim()
                    );
                } else {
                    println!(
                        "  Approve with: {}",
                        style(format!("phaseflow approve {run_id} {}", request.decision_id)).dim()
                    );
                    println!(
                        "  Reject with:  {}",
                        style(format!("phaseflow reject {run_id} {}", request.decision_id)).dim()
                    );
                }
            }
            None => {
                println!(
                    "  {} Run {} paused with its decision answered",
                    style("?").yellow().bold(),
                    style(run_id).cyan(),
                );
                println!();
            }
        },
        RunStatus::Failed => {
            let detail = report
                .failure
                .as_ref()
                .map(|f| format!("{}: {}", f.kind, f.reason))
                .unwrap_or_else(|| "unknown failure".to_string());
            println!(
                "  {} Run {} failed ({detail})",
                style("x").red().bold(),
                style(run_id).cyan(),
            );
            println!();
            println!(
                "  Inspect with: {}",
                style(format!("phaseflow events {run_id}")).dim()
            );
        }
        RunStatus::Pending | RunStatus::Running => {
            println!(
                "  {} Run {} is {} ({}/{} steps)",
                style("*").cyan().bold(),
                style(run_id).cyan(),
                report.status,
                report.completed_steps,
                report.total_steps,
            );
        }
    }

    if report.status == RunStatus::Paused || report.status == RunStatus::Pending {
        println!(
            "  Resume with:  {}",
            style(format!("phaseflow run {run_id}")).dim()
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Errors and exit codes
// ---------------------------------------------------------------------------

fn engine_error(err: &anyhow::Error) -> Option<&EngineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<EngineError>())
}

/// Exit code for a failed command: the engine's mapping, else 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    engine_error(err).map_or(EXIT_FAILURE, EngineError::exit_code)
}

/// Recovery commands worth suggesting for a failed run: (inspect, resume).
fn recovery_hints(err: &EngineError) -> (bool, bool) {
    match err {
        EngineError::StepExecution { .. }
        | EngineError::GuardFailure { .. }
        | EngineError::ConcurrencyConflict { .. }
        | EngineError::EventLog { .. } => (true, true),
        EngineError::BudgetExceeded { .. }
        | EngineError::Aborted { .. }
        | EngineError::ApprovalRejected { .. }
        | EngineError::InvalidTransition { .. }
        | EngineError::UnknownDecision { .. } => (true, false),
        _ => (false, false),
    }
}

/// Print a command failure, naming the run and how to inspect or resume it.
pub fn report_error(err: &anyhow::Error, json: bool) {
    let engine_err = engine_error(err);
    let run_id = engine_err.and_then(EngineError::run_id);

    if json {
        let out = serde_json::json!({
            "error": format!("{err:#}"),
            "run_id": run_id,
            "exit_code": exit_code(err),
        });
        println!("{out:#}");
        return;
    }

    eprintln!();
    eprintln!("  {} {err:#}", style("x").red().bold());

    let (inspect, resume) = engine_err.map_or((false, false), recovery_hints);
    if let Some(run_id) = run_id.filter(|_| inspect) {
        eprintln!();
        eprintln!(
            "  Inspect with: {}",
            style(format!("phaseflow status {run_id}")).dim()
        );
        eprintln!(
            "                {}",
            style(format!("phaseflow events {run_id}")).dim()
        );
        if resume {
            eprintln!(
                "  Resume with:  {}",
                style(format!("phaseflow run {run_id}")).dim()
            );
        }
    }
    eprintln!();
}
