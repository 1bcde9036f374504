//! Application state wiring configuration, definitions, and the engine.
//!
//! AppState holds what every command needs regardless of storage backend.
//! The engine itself is generic over its stores, so it is built per backend
//! by [`AppState::engine`] once the caller has opened the stores.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use phaseflow_core::engine::{Engine, EngineOptions};
use phaseflow_core::executor::BoxStepExecutor;
use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_core::repository::plan::PlanStore;
use phaseflow_core::workflow::compiler::{CompilerDefaults, PlanCompiler};
use phaseflow_core::workflow::registry::DefinitionRegistry;
use phaseflow_infra::config::{load_config, resolve_data_dir};
use phaseflow_infra::executor::CommandStepExecutor;
use phaseflow_infra::probe::GitBranchProbe;
use phaseflow_infra::workflow_loader::{load_workflow_dirs, workflow_dirs};
use phaseflow_types::budget::BudgetLedger;
use phaseflow_types::config::{PhaseflowConfig, StorageBackend};

use crate::cli::prompt::TerminalDecisionChannel;

/// Shared state for CLI commands.
#[derive(Debug)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: PhaseflowConfig,
    pub registry: DefinitionRegistry,
}

impl AppState {
    /// Resolve the data directory, load config and workflow definitions.
    ///
    /// `data_dir` and `backend` are CLI flags; they win over config and env.
    pub async fn init(
        data_dir: Option<PathBuf>,
        backend: Option<StorageBackend>,
    ) -> anyhow::Result<Self> {
        let data_dir = data_dir.unwrap_or_else(resolve_data_dir);

        // Ensure data directory exists
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let mut config = load_config(&data_dir)
            .await
            .context("Invalid PHASEFLOW_* environment override")?;
        if let Some(backend) = backend {
            config.storage.backend = backend;
        }

        let mut registry =
            DefinitionRegistry::with_builtins().context("Built-in workflow definitions are invalid")?;
        let report = load_workflow_dirs(&mut registry, &workflow_dirs(&data_dir, &config)).await;

        tracing::debug!(
            data_dir = %data_dir.display(),
            backend = %config.storage.backend,
            workflows = registry.len(),
            skipped = report.skipped.len(),
            "application state initialized"
        );

        Ok(Self {
            data_dir,
            config,
            registry,
        })
    }

    /// Compiler seeded with the configured autonomy and retry defaults.
    pub fn compiler(&self) -> PlanCompiler {
        PlanCompiler::new(CompilerDefaults {
            autonomy: self.config.engine.autonomy,
            max_retries: self.config.engine.default_max_retries,
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        let budget = &self.config.budget;
        EngineOptions {
            step_timeout: Duration::from_secs(self.config.engine.step_timeout_secs),
            abort_poll_interval: Duration::from_secs(self.config.engine.abort_poll_secs),
            protected_branches: self.config.guards.protected_branches.clone(),
            budget: BudgetLedger::with_ceiling(budget.ceiling, budget.warning_pct, budget.approval_pct),
        }
    }

    /// Wire an engine over the given stores.
    ///
    /// Steps run through the configured commands from the current directory,
    /// the branch guard asks git, and `interactive` answers gates on the
    /// terminal instead of pausing.
    pub fn engine<C, L, P>(&self, checkpoints: C, events: L, plans: P, interactive: bool) -> Engine<C, L, P>
    where
        C: CheckpointStore,
        L: EventLog,
        P: PlanStore,
    {
        let executor = BoxStepExecutor::new(CommandStepExecutor::new(&self.config.executor));
        let engine = Engine::new(checkpoints, events, plans, executor, self.engine_options())
            .with_probe(GitBranchProbe::new("."));

        if interactive {
            engine.with_decision_channel(TerminalDecisionChannel::new())
        } else {
            engine
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaseflow_core::workflow::registry::STANDARD_WORKFLOW_ID;
    use phaseflow_types::plan::AutonomyLevel;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_loads_config_and_workflows_from_data_dir() {
        let dir = tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.toml"),
            "[engine]\nautonomy = \"manual\"\nstep_timeout_secs = 60\n\n[budget]\nceiling = 500\n",
        )
        .await
        .unwrap();
        tokio::fs::create_dir_all(dir.path().join("workflows")).await.unwrap();
        tokio::fs::write(
            dir.path().join("workflows/docs.yaml"),
            "id: docs\nextends: standard\n",
        )
        .await
        .unwrap();

        let state = AppState::init(Some(dir.path().to_path_buf()), None).await.unwrap();

        assert_eq!(state.config.engine.autonomy, AutonomyLevel::Manual);
        assert!(state.registry.contains(STANDARD_WORKFLOW_ID));
        assert!(state.registry.contains("docs"));

        let options = state.engine_options();
        assert_eq!(options.step_timeout, Duration::from_secs(60));
        assert_eq!(options.budget.ceiling, Some(500));
        assert_eq!(options.protected_branches, ["main", "master"]);
    }

    #[tokio::test]
    async fn backend_flag_wins_over_config() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("config.toml"), "[storage]\nbackend = \"file\"\n")
            .await
            .unwrap();

        let state = AppState::init(Some(dir.path().to_path_buf()), Some(StorageBackend::Sqlite))
            .await
            .unwrap();
        assert_eq!(state.config.storage.backend, StorageBackend::Sqlite);
    }

    #[tokio::test]
    async fn init_creates_a_missing_data_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b");
        let state = AppState::init(Some(nested.clone()), None).await.unwrap();
        assert!(nested.is_dir());
        assert_eq!(state.data_dir, nested);
    }
}
