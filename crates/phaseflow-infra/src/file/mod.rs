//! File-per-run storage.
//!
//! Each run owns one directory:
//!
//! ```text
//! {data_dir}/runs/{run_id}/
//!     plan.json      create-only
//!     state.json     replaced atomically on every checkpoint
//!     events.jsonl   one RunEvent per line, append-only
//!     .lock          fd-lock held for every read-modify-write
//! ```
//!
//! The lock is an OS file lock, so two processes pointed at the same data
//! directory serialize their writes the same way two tasks do. All file IO
//! runs on the blocking pool.

pub mod checkpoint;
pub mod event_log;
pub mod plan;

pub use checkpoint::FileCheckpointStore;
pub use event_log::FileEventLog;
pub use plan::FilePlanStore;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use phaseflow_types::error::RepositoryError;
use tempfile::NamedTempFile;
use uuid::Uuid;

const PLAN_FILE: &str = "plan.json";
const STATE_FILE: &str = "state.json";
const EVENTS_FILE: &str = "events.jsonl";
const LOCK_FILE: &str = ".lock";

/// Path layout under `{data_dir}/runs`.
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
}

impl RunDirectory {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("runs"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: Uuid) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    pub fn plan_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join(PLAN_FILE)
    }

    pub fn state_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join(STATE_FILE)
    }

    pub fn events_path(&self, run_id: Uuid) -> PathBuf {
        self.run_dir(run_id).join(EVENTS_FILE)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn io_error(path: &Path, err: std::io::Error) -> RepositoryError {
    RepositoryError::Connection(format!("{}: {err}", path.display()))
}

/// Run `f` on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, RepositoryError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RepositoryError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RepositoryError::Connection(format!("storage task failed: {e}")))?
}

/// Run `f` while holding the exclusive lock of `run_dir`, creating the
/// directory first if needed.
fn with_run_lock<T>(
    run_dir: &Path,
    f: impl FnOnce() -> Result<T, RepositoryError>,
) -> Result<T, RepositoryError> {
    fs::create_dir_all(run_dir).map_err(|e| io_error(run_dir, e))?;

    let lock_path = run_dir.join(LOCK_FILE);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| io_error(&lock_path, e))?;

    let mut lock = RwLock::new(lock_file);
    let _guard = lock.write().map_err(|e| io_error(&lock_path, e))?;
    f()
}

/// Write via temp file + fsync + rename so readers never see a torn file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), RepositoryError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    temp.write_all(bytes).map_err(|e| io_error(path, e))?;
    temp.as_file().sync_all().map_err(|e| io_error(path, e))?;
    temp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}

/// File contents, or `None` when it does not exist.
fn read_optional(path: &Path) -> Result<Option<String>, RepositoryError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_error(path, err)),
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(path: &Path, content: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(content)
        .map_err(|e| RepositoryError::Query(format!("invalid JSON in {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_is_one_directory_per_run() {
        let dir = tempdir().unwrap();
        let layout = RunDirectory::new(dir.path());
        let run_id = Uuid::now_v7();

        let run_dir = layout.run_dir(run_id);
        assert_eq!(run_dir, dir.path().join("runs").join(run_id.to_string()));
        assert_eq!(layout.plan_path(run_id), run_dir.join("plan.json"));
        assert_eq!(layout.state_path(run_id), run_dir.join("state.json"));
        assert_eq!(layout.events_path(run_id), run_dir.join("events.jsonl"));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"{\"v\":1}").unwrap();
        write_atomic(&path, b"{\"v\":2}").unwrap();

        assert_eq!(read_optional(&path).unwrap().as_deref(), Some("{\"v\":2}"));
        assert!(read_optional(&dir.path().join("missing.json")).unwrap().is_none());
    }

    #[test]
    fn run_lock_creates_directory_and_lock_file() {
        let dir = tempdir().unwrap();
        let run_dir = dir.path().join("runs").join("r1");

        let value = with_run_lock(&run_dir, || Ok(7)).unwrap();

        assert_eq!(value, 7);
        assert!(run_dir.join(LOCK_FILE).exists());
    }
}
