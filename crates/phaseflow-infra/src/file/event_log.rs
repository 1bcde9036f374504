//! `events.jsonl` event log.
//!
//! Appends happen under the run lock: read the last sequenced line, write
//! the next one, fsync. A line torn by a crash mid-write is skipped on read
//! and sealed with a newline before the next append, so it never hides a
//! later event.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use phaseflow_core::repository::event_log::EventLog;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::event::{NewRunEvent, RunEvent};
use uuid::Uuid;

use super::{RunDirectory, blocking, io_error, read_optional, with_run_lock};

/// File-backed implementation of `EventLog`.
#[derive(Debug, Clone)]
pub struct FileEventLog {
    layout: RunDirectory,
}

impl FileEventLog {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            layout: RunDirectory::new(data_dir),
        }
    }
}

/// Parse every well-formed line, in file order.
fn parse_lines(path: &Path, content: &str) -> Vec<RunEvent> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<RunEvent>(line) {
            Ok(event) => Some(event),
            Err(err) => {
                tracing::warn!("Skipping malformed event line in {}: {err}", path.display());
                None
            }
        })
        .collect()
}

fn read_events(path: &Path) -> Result<Vec<RunEvent>, RepositoryError> {
    Ok(read_optional(path)?
        .map(|content| parse_lines(path, &content))
        .unwrap_or_default())
}

impl EventLog for FileEventLog {
    async fn append(&self, event: NewRunEvent) -> Result<RunEvent, RepositoryError> {
        let run_id = event.run_id;
        let run_dir = self.layout.run_dir(run_id);
        let path = self.layout.events_path(run_id);

        let stored = blocking(move || {
            with_run_lock(&run_dir, || {
                let content = read_optional(&path)?.unwrap_or_default();
                let last_seq = parse_lines(&path, &content)
                    .last()
                    .map(|e| e.seq)
                    .unwrap_or(0);
                let stored = event.sequenced(last_seq + 1);

                let mut line = String::new();
                if !content.is_empty() && !content.ends_with('\n') {
                    line.push('\n');
                }
                line.push_str(&serde_json::to_string(&stored).map_err(|e| {
                    RepositoryError::Query(format!("failed to encode event: {e}"))
                })?);
                line.push('\n');

                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| io_error(&path, e))?;
                file.write_all(line.as_bytes())
                    .map_err(|e| io_error(&path, e))?;
                file.sync_data().map_err(|e| io_error(&path, e))?;
                Ok(stored)
            })
        })
        .await?;

        tracing::debug!(
            run_id = %run_id,
            seq = stored.seq,
            kind = %stored.kind,
            "appended event"
        );
        Ok(stored)
    }

    async fn list(&self, run_id: Uuid, since_seq: u64) -> Result<Vec<RunEvent>, RepositoryError> {
        let path = self.layout.events_path(run_id);
        let events = blocking(move || read_events(&path)).await?;
        Ok(events.into_iter().filter(|e| e.seq > since_seq).collect())
    }
}
