//! SQLite event log over the `run_events` table.

use chrono::Utc;
use phaseflow_core::repository::event_log::EventLog;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::event::{EventKind, NewRunEvent, RunEvent};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_uuid};

/// SQLite-backed implementation of `EventLog`.
///
/// The next `seq` is computed inside the insert, in one transaction, and
/// `UNIQUE(run_id, seq)` rejects any duplicate a second process could race in.
#[derive(Debug, Clone)]
pub struct SqliteEventLog {
    pool: DatabasePool,
}

impl SqliteEventLog {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct EventRow {
    run_id: String,
    seq: i64,
    kind: String,
    phase: Option<String>,
    step_id: Option<String>,
    payload: String,
    timestamp: String,
}

impl EventRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            run_id: row.try_get("run_id")?,
            seq: row.try_get("seq")?,
            kind: row.try_get("kind")?,
            phase: row.try_get("phase")?,
            step_id: row.try_get("step_id")?,
            payload: row.try_get("payload")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_event(self) -> Result<RunEvent, RepositoryError> {
        let kind: EventKind = serde_json::from_value(serde_json::Value::String(self.kind.clone()))
            .map_err(|_| RepositoryError::Query(format!("invalid event kind: {}", self.kind)))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid event payload: {e}")))?;

        Ok(RunEvent {
            run_id: parse_uuid(&self.run_id)?,
            seq: self.seq as u64,
            timestamp: parse_datetime(&self.timestamp)?,
            kind,
            phase: self.phase,
            step_id: self.step_id,
            payload,
        })
    }
}

impl EventLog for SqliteEventLog {
    async fn append(&self, event: NewRunEvent) -> Result<RunEvent, RepositoryError> {
        let timestamp = Utc::now();
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| RepositoryError::Query(format!("serialize event payload: {e}")))?;
        let run_id = event.run_id.to_string();

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let (seq,): (i64,) = sqlx::query_as(
            r#"INSERT INTO run_events (run_id, seq, kind, phase, step_id, payload, timestamp)
               SELECT ?, COALESCE(MAX(seq), 0) + 1, ?, ?, ?, ?, ?
               FROM run_events WHERE run_id = ?
               RETURNING seq"#,
        )
        .bind(&run_id)
        .bind(event.kind.as_str())
        .bind(&event.phase)
        .bind(&event.step_id)
        .bind(&payload)
        .bind(format_datetime(&timestamp))
        .bind(&run_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(run_id = %event.run_id, seq, kind = %event.kind, "appended event");

        Ok(RunEvent {
            run_id: event.run_id,
            seq: seq as u64,
            timestamp,
            kind: event.kind,
            phase: event.phase,
            step_id: event.step_id,
            payload: event.payload,
        })
    }

    async fn list(&self, run_id: Uuid, since_seq: u64) -> Result<Vec<RunEvent>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT run_id, seq, kind, phase, step_id, payload, timestamp
               FROM run_events WHERE run_id = ? AND seq > ?
               ORDER BY seq ASC"#,
        )
        .bind(run_id.to_string())
        .bind(since_seq as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                EventRow::from_row(row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_event()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;
    use crate::testing;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn honours_event_log_contract() {
        let log = SqliteEventLog::new(test_pool().await);
        testing::event_log_contract(&log).await;
    }

    #[tokio::test]
    async fn duplicate_sequence_is_rejected_by_the_schema() {
        let pool = test_pool().await;
        let log = SqliteEventLog::new(pool.clone());
        let run_id = Uuid::now_v7();
        log.append(NewRunEvent::new(run_id, EventKind::WorkflowStarted))
            .await
            .unwrap();

        let duplicate = sqlx::query(
            "INSERT INTO run_events (run_id, seq, kind, payload, timestamp) VALUES (?, 1, 'step_start', 'null', ?)",
        )
        .bind(run_id.to_string())
        .bind(format_datetime(&Utc::now()))
        .execute(&pool.writer)
        .await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn concurrent_appends_get_distinct_sequence_numbers() {
        let log = SqliteEventLog::new(test_pool().await);
        let run_id = Uuid::now_v7();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(NewRunEvent::new(run_id, EventKind::StepRetry))
                    .await
                    .unwrap()
                    .seq
            }));
        }
        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=10).collect::<Vec<u64>>());
    }
}
