//! Workflow definition discovery.
//!
//! Scans `{data_dir}/workflows` and every `[workflows] dirs` entry for
//! `*.yaml` / `*.yml` files and inserts them into a [`DefinitionRegistry`]
//! on top of the built-ins. Directories are read in order and files by
//! name, so a later definition with the same id shadows an earlier one.

use std::path::{Path, PathBuf};

use phaseflow_core::workflow::registry::DefinitionRegistry;
use phaseflow_types::config::PhaseflowConfig;

/// Outcome of a directory scan.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Ids inserted, in load order.
    pub loaded: Vec<String>,
    /// Files that could not be read or failed validation.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Directories searched for definitions, in precedence order (last wins).
pub fn workflow_dirs(data_dir: &Path, config: &PhaseflowConfig) -> Vec<PathBuf> {
    let mut dirs = vec![data_dir.join("workflows")];
    dirs.extend(config.workflows.dirs.iter().cloned());
    dirs
}

/// Load every definition file under `dirs` into `registry`.
///
/// A missing directory is skipped. A file that fails to parse or validate
/// is logged and reported in [`LoadReport::skipped`]; the rest still load.
pub async fn load_workflow_dirs(registry: &mut DefinitionRegistry, dirs: &[PathBuf]) -> LoadReport {
    let mut report = LoadReport::default();

    for dir in dirs {
        let files = match definition_files(dir).await {
            Ok(files) => files,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No workflow directory at {}", dir.display());
                continue;
            }
            Err(err) => {
                tracing::warn!("Failed to read workflow directory {}: {err}", dir.display());
                report.skipped.push((dir.clone(), err.to_string()));
                continue;
            }
        };

        for path in files {
            let yaml = match tokio::fs::read_to_string(&path).await {
                Ok(yaml) => yaml,
                Err(err) => {
                    tracing::warn!("Failed to read {}: {err}", path.display());
                    report.skipped.push((path, err.to_string()));
                    continue;
                }
            };
            match registry.insert_yaml(&yaml) {
                Ok(id) => {
                    tracing::debug!(workflow_id = %id, path = %path.display(), "loaded workflow definition");
                    report.loaded.push(id);
                }
                Err(err) => {
                    tracing::warn!("Skipping workflow definition {}: {err}", path.display());
                    report.skipped.push((path, err.to_string()));
                }
            }
        }
    }

    report
}

/// `*.yaml` / `*.yml` files directly inside `dir`, sorted by name.
async fn definition_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        if is_yaml && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phaseflow_core::workflow::registry::STANDARD_WORKFLOW_ID;
    use tempfile::tempdir;

    const HOTFIX: &str = r#"
id: hotfix
extends: standard
phases:
  - name: build
    steps:
      - id: implement
        prompt: "apply the hotfix for {{work_ref}}"
"#;

    #[tokio::test]
    async fn loads_yaml_files_over_builtins() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("hotfix.yaml"), HOTFIX).await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let mut registry = DefinitionRegistry::with_builtins().unwrap();
        let report = load_workflow_dirs(&mut registry, &[dir.path().to_path_buf()]).await;

        assert_eq!(report.loaded, ["hotfix"]);
        assert!(report.skipped.is_empty());
        assert!(registry.contains("hotfix"));
        assert!(registry.contains(STANDARD_WORKFLOW_ID));
    }

    #[tokio::test]
    async fn invalid_files_are_skipped_and_reported() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("a-broken.yml"), "id: [unterminated").await.unwrap();
        tokio::fs::write(dir.path().join("b-hotfix.yaml"), HOTFIX).await.unwrap();

        let mut registry = DefinitionRegistry::with_builtins().unwrap();
        let report = load_workflow_dirs(&mut registry, &[dir.path().to_path_buf()]).await;

        assert_eq!(report.loaded, ["hotfix"]);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].0.ends_with("a-broken.yml"));
    }

    #[tokio::test]
    async fn missing_directories_are_ignored() {
        let dir = tempdir().unwrap();
        let mut registry = DefinitionRegistry::new();
        let report = load_workflow_dirs(&mut registry, &[dir.path().join("nope")]).await;
        assert!(report.loaded.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn data_dir_workflows_come_first() {
        let mut config = PhaseflowConfig::default();
        config.workflows.dirs.push(PathBuf::from("/etc/phaseflow/workflows"));
        let dirs = workflow_dirs(Path::new("/data"), &config);
        assert_eq!(
            dirs,
            [
                PathBuf::from("/data/workflows"),
                PathBuf::from("/etc/phaseflow/workflows")
            ]
        );
    }
}
