//! phaseflow CLI entry point.
//!
//! Binary name: `phaseflow`
//!
//! Parses CLI arguments, loads configuration and workflow definitions, opens
//! the configured run store, then dispatches to the command handler. The
//! process exit code follows the engine's error taxonomy: 0 for success or
//! a clean pause, 1 for failures, 2 for budget exhaustion, 3 for aborts.

mod cli;
mod state;

use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use clap_complete::generate;
use phaseflow_core::error::{EXIT_FAILURE, EXIT_OK};
use phaseflow_infra::file::{FileCheckpointStore, FileEventLog, FilePlanStore};
use phaseflow_infra::sqlite::{
    DatabasePool, SqliteCheckpointStore, SqliteEventLog, SqlitePlanStore, database_url,
};
use phaseflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};
use phaseflow_types::config::StorageBackend;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let directive = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,phaseflow=debug",
        _ => "trace",
    };
    let tracing_options = TracingOptions {
        directive: directive.to_string(),
        json: cli.log_json,
        otel: cli.otel,
    };
    if let Err(err) = init_tracing(&tracing_options) {
        eprintln!("warning: failed to initialize tracing: {err}");
    }

    let json = cli.json;
    let code = match execute(cli).await {
        Ok(()) => EXIT_OK,
        Err(err) => {
            cli::report_error(&err, json);
            cli::exit_code(&err)
        }
    };

    shutdown_tracing();
    ExitCode::from(u8::try_from(code).unwrap_or(EXIT_FAILURE as u8))
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "phaseflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.data_dir.clone(), cli.backend).await?;

    // Definition browsing doesn't need a run store
    if let Commands::Workflows { action } = &cli.command {
        return cli::workflows::handle(&state, action, cli.json);
    }

    let interactive = matches!(cli.command, Commands::Run { interactive: true, .. });

    match state.config.storage.backend {
        StorageBackend::File => {
            let engine = state.engine(
                FileCheckpointStore::new(&state.data_dir),
                FileEventLog::new(&state.data_dir),
                FilePlanStore::new(&state.data_dir),
                interactive,
            );
            cli::dispatch(&state, &engine, cli.command, cli.json).await
        }
        StorageBackend::Sqlite => {
            let pool = DatabasePool::new(&database_url(&state.data_dir))
                .await
                .context("Failed to open the run database")?;
            let engine = state.engine(
                SqliteCheckpointStore::new(pool.clone()),
                SqliteEventLog::new(pool.clone()),
                SqlitePlanStore::new(pool.clone()),
                interactive,
            );
            let result = cli::dispatch(&state, &engine, cli.command, cli.json).await;
            pool.close().await;
            result
        }
        StorageBackend::Memory => bail!(
            "the memory backend cannot be used from the CLI: runs would not outlive the process \
             (set [storage] backend to \"file\" or \"sqlite\")"
        ),
    }
}
