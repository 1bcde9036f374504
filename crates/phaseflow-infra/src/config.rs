//! Configuration loader for phaseflow.
//!
//! Reads `config.toml` from the data directory (`~/.phaseflow/` in
//! production) into [`PhaseflowConfig`], then layers `PHASEFLOW_*`
//! environment overrides on top. A missing or malformed file falls back to
//! defaults; a malformed environment override is an error because the user
//! asked for it explicitly.

use std::path::{Path, PathBuf};

use phaseflow_types::config::{PhaseflowConfig, StorageBackend};
use phaseflow_types::plan::AutonomyLevel;

pub const CONFIG_FILE: &str = "config.toml";
pub const DATA_DIR_ENV: &str = "PHASEFLOW_DATA_DIR";

const AUTONOMY_ENV: &str = "PHASEFLOW_AUTONOMY";
const BACKEND_ENV: &str = "PHASEFLOW_BACKEND";
const BUDGET_CEILING_ENV: &str = "PHASEFLOW_BUDGET_CEILING";
const PROTECTED_BRANCHES_ENV: &str = "PHASEFLOW_PROTECTED_BRANCHES";
const MAX_RETRIES_ENV: &str = "PHASEFLOW_MAX_RETRIES";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Resolve the data directory.
///
/// Priority:
/// 1. `PHASEFLOW_DATA_DIR` environment variable
/// 2. `~/.phaseflow`
/// 3. `.phaseflow` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".phaseflow");
    }

    PathBuf::from(".phaseflow")
}

/// Load `{data_dir}/config.toml` and apply process environment overrides.
pub async fn load_config(data_dir: &Path) -> Result<PhaseflowConfig, ConfigError> {
    let mut config = load_config_file(data_dir).await;
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    Ok(config)
}

/// Load `{data_dir}/config.toml` alone.
///
/// - If the file does not exist, returns [`PhaseflowConfig::default()`].
/// - If the file exists but cannot be read or parsed, logs a warning and
///   returns the default.
pub async fn load_config_file(data_dir: &Path) -> PhaseflowConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return PhaseflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return PhaseflowConfig::default();
        }
    };

    match toml::from_str::<PhaseflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            PhaseflowConfig::default()
        }
    }
}

/// Apply `PHASEFLOW_*` overrides read through `lookup`.
///
/// Empty values are ignored. `PHASEFLOW_PROTECTED_BRANCHES` is a
/// comma-separated list.
pub fn apply_env_overrides(
    config: &mut PhaseflowConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(value) = get(AUTONOMY_ENV) {
        config.engine.autonomy = value
            .parse::<AutonomyLevel>()
            .map_err(|reason| invalid(AUTONOMY_ENV, &value, reason))?;
    }

    if let Some(value) = get(BACKEND_ENV) {
        config.storage.backend = value
            .parse::<StorageBackend>()
            .map_err(|reason| invalid(BACKEND_ENV, &value, reason))?;
    }

    if let Some(value) = get(BUDGET_CEILING_ENV) {
        let ceiling = value
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(BUDGET_CEILING_ENV, &value, e.to_string()))?;
        config.budget.ceiling = Some(ceiling);
    }

    if let Some(value) = get(PROTECTED_BRANCHES_ENV) {
        config.guards.protected_branches = value
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect();
    }

    if let Some(value) = get(MAX_RETRIES_ENV) {
        config.engine.default_max_retries = value
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(MAX_RETRIES_ENV, &value, e.to_string()))?;
    }

    Ok(())
}

fn invalid(var: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[tokio::test]
    async fn load_config_file_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config_file(tmp.path()).await;
        assert_eq!(config, PhaseflowConfig::default());
    }

    #[tokio::test]
    async fn load_config_file_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"
[storage]
backend = "sqlite"

[budget]
ceiling = 10000
warning_pct = 70

[guards]
protected_branches = ["trunk"]
"#,
        )
        .await
        .unwrap();

        let config = load_config_file(tmp.path()).await;
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.budget.ceiling, Some(10_000));
        assert_eq!(config.budget.warning_pct, 70);
        assert_eq!(config.guards.protected_branches, vec!["trunk"]);
    }

    #[tokio::test]
    async fn load_config_file_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config_file(tmp.path()).await;
        assert_eq!(config, PhaseflowConfig::default());
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = PhaseflowConfig::default();
        config.budget.ceiling = Some(100);

        apply_env_overrides(
            &mut config,
            env(&[
                ("PHASEFLOW_AUTONOMY", "autonomous"),
                ("PHASEFLOW_BACKEND", "sqlite"),
                ("PHASEFLOW_BUDGET_CEILING", "5000"),
                ("PHASEFLOW_PROTECTED_BRANCHES", "main, release ,"),
                ("PHASEFLOW_MAX_RETRIES", "4"),
            ]),
        )
        .unwrap();

        assert_eq!(config.engine.autonomy, AutonomyLevel::Autonomous);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.budget.ceiling, Some(5_000));
        assert_eq!(config.guards.protected_branches, vec!["main", "release"]);
        assert_eq!(config.engine.default_max_retries, 4);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = PhaseflowConfig::default();
        apply_env_overrides(&mut config, env(&[("PHASEFLOW_BACKEND", "  ")])).unwrap();
        assert_eq!(config, PhaseflowConfig::default());
    }

    #[test]
    fn malformed_env_value_is_an_error() {
        let mut config = PhaseflowConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("PHASEFLOW_BUDGET_CEILING", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("PHASEFLOW_BUDGET_CEILING"));

        let err = apply_env_overrides(&mut config, env(&[("PHASEFLOW_AUTONOMY", "yolo")]))
            .unwrap_err();
        assert!(err.to_string().contains("yolo"));
    }
}
