//! Configuration types for phaseflow.
//!
//! `PhaseflowConfig` mirrors `config.toml` in the data directory. Every field
//! has a default, so an empty file (or no file) is a valid configuration.
//! The loader in phaseflow-infra layers environment overrides on top; the
//! CLI applies flags last. The result is built once and handed to
//! constructors.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::plan::AutonomyLevel;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseflowConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub budget: BudgetSettings,
    #[serde(default)]
    pub guards: GuardSettings,
    #[serde(default)]
    pub workflows: WorkflowSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
}

// ---------------------------------------------------------------------------
// [engine]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Autonomy used when a plan is compiled without an explicit level.
    #[serde(default)]
    pub autonomy: AutonomyLevel,
    /// Retry ceiling for phases that do not declare one.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Upper bound on a single executor call. A timeout counts as a failure.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// While a step or decision is outstanding, re-read the run this often
    /// to notice an abort issued from another process.
    #[serde(default = "default_abort_poll_secs")]
    pub abort_poll_secs: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_step_timeout_secs() -> u64 {
    1_800
}

fn default_abort_poll_secs() -> u64 {
    2
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            autonomy: AutonomyLevel::default(),
            default_max_retries: default_max_retries(),
            step_timeout_secs: default_step_timeout_secs(),
            abort_poll_secs: default_abort_poll_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// [storage]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One directory per run under `{data_dir}/runs`.
    #[default]
    File,
    /// `{data_dir}/phaseflow.db`.
    Sqlite,
    /// Process-local with TTL eviction. Only useful for embedding and tests.
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Idle lifetime of a run in the memory backend.
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,
}

fn default_memory_ttl_secs() -> u64 {
    86_400
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            memory_ttl_secs: default_memory_ttl_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// [budget]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSettings {
    /// Hard ceiling in resource units. Unset means unmetered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<u64>,
    #[serde(default = "default_warning_pct")]
    pub warning_pct: u8,
    #[serde(default = "default_approval_pct")]
    pub approval_pct: u8,
}

fn default_warning_pct() -> u8 {
    80
}

fn default_approval_pct() -> u8 {
    90
}

impl Default for BudgetSettings {
    fn default() -> Self {
        Self {
            ceiling: None,
            warning_pct: default_warning_pct(),
            approval_pct: default_approval_pct(),
        }
    }
}

// ---------------------------------------------------------------------------
// [guards]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardSettings {
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,
}

fn default_protected_branches() -> Vec<String> {
    vec!["main".to_string(), "master".to_string()]
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            protected_branches: default_protected_branches(),
        }
    }
}

// ---------------------------------------------------------------------------
// [workflows] / [executor]
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Extra directories scanned for `*.yaml` / `*.yml` definitions, after
    /// `{data_dir}/workflows`.
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Command run for free-form instruction steps. The instruction text is
    /// written to its stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_command: Option<String>,
    /// Named operation id -> command line. Operation args are appended.
    #[serde(default)]
    pub operations: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PhaseflowConfig::default();
        assert_eq!(config.engine.autonomy, AutonomyLevel::Supervised);
        assert_eq!(config.engine.default_max_retries, 2);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.budget.ceiling, None);
        assert_eq!(config.budget.warning_pct, 80);
        assert_eq!(config.budget.approval_pct, 90);
        assert_eq!(config.guards.protected_branches, vec!["main", "master"]);
    }

    #[test]
    fn empty_toml_is_default() {
        let config: PhaseflowConfig = toml::from_str("").unwrap();
        assert_eq!(config, PhaseflowConfig::default());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: PhaseflowConfig = toml::from_str(
            r#"
[engine]
autonomy = "manual"

[budget]
ceiling = 5000

[executor.operations]
open-pr = "gh pr create --fill"
"#,
        )
        .unwrap();
        assert_eq!(config.engine.autonomy, AutonomyLevel::Manual);
        assert_eq!(config.engine.step_timeout_secs, 1_800);
        assert_eq!(config.engine.abort_poll_secs, 2);
        assert_eq!(config.budget.ceiling, Some(5_000));
        assert_eq!(config.budget.approval_pct, 90);
        assert_eq!(config.executor.operations["open-pr"], "gh pr create --fill");
    }

    #[test]
    fn backend_from_str() {
        assert_eq!("SQLite".parse::<StorageBackend>().unwrap(), StorageBackend::Sqlite);
        assert!("redis".parse::<StorageBackend>().is_err());
    }
}
