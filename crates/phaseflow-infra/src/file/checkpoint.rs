//! `state.json` checkpoint store.

use std::path::Path;

use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::run::RunState;
use uuid::Uuid;

use super::{RunDirectory, blocking, parse_json, read_optional, with_run_lock, write_atomic};

/// File-backed implementation of `CheckpointStore`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    layout: RunDirectory,
}

impl FileCheckpointStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            layout: RunDirectory::new(data_dir),
        }
    }
}

fn read_state(path: &Path) -> Result<Option<RunState>, RepositoryError> {
    read_optional(path)?
        .map(|content| parse_json(path, &content))
        .transpose()
}

fn encode(state: &RunState) -> Result<Vec<u8>, RepositoryError> {
    serde_json::to_vec_pretty(state)
        .map_err(|e| RepositoryError::Query(format!("failed to encode run state: {e}")))
}

impl CheckpointStore for FileCheckpointStore {
    async fn get(&self, run_id: Uuid) -> Result<Option<RunState>, RepositoryError> {
        let path = self.layout.state_path(run_id);
        blocking(move || read_state(&path)).await
    }

    async fn put(&self, state: &RunState) -> Result<(), RepositoryError> {
        let run_id = state.run_id;
        let run_dir = self.layout.run_dir(run_id);
        let path = self.layout.state_path(run_id);
        let bytes = encode(state)?;

        blocking(move || {
            with_run_lock(&run_dir, || {
                if path.exists() {
                    return Err(RepositoryError::Conflict(format!(
                        "run {run_id} already has a state record"
                    )));
                }
                write_atomic(&path, &bytes)
            })
        })
        .await?;

        tracing::debug!(run_id = %run_id, "created run state");
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        run_id: Uuid,
        expected_version: u64,
        state: &RunState,
    ) -> Result<u64, RepositoryError> {
        let run_dir = self.layout.run_dir(run_id);
        let path = self.layout.state_path(run_id);
        let mut next = state.clone();
        next.version = expected_version + 1;
        let bytes = encode(&next)?;

        blocking(move || {
            with_run_lock(&run_dir, || {
                let current = read_state(&path)?.ok_or_else(|| {
                    RepositoryError::Conflict(format!("run {run_id} has no state record"))
                })?;
                if current.version != expected_version {
                    return Err(RepositoryError::Conflict(format!(
                        "run {run_id} is at version {}, expected {expected_version}",
                        current.version
                    )));
                }
                write_atomic(&path, &bytes)
            })
        })
        .await?;

        tracing::debug!(run_id = %run_id, version = expected_version + 1, "checkpointed run state");
        Ok(expected_version + 1)
    }

    async fn list(&self) -> Result<Vec<RunState>, RepositoryError> {
        let root = self.layout.root().to_path_buf();
        blocking(move || {
            let entries = match std::fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(super::io_error(&root, err)),
            };

            let mut states = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path().join(super::STATE_FILE);
                match read_state(&path) {
                    Ok(Some(state)) => states.push(state),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!("Skipping unreadable run state {}: {err}", path.display());
                    }
                }
            }
            states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            Ok(states)
        })
        .await
    }
}
