//! SQLite checkpoint store over the `run_states` table.

use phaseflow_core::repository::checkpoint::CheckpointStore;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::run::RunState;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, insert_error};

/// SQLite-backed implementation of `CheckpointStore`.
///
/// Compare-and-swap is a single `UPDATE ... WHERE version = ?`; zero rows
/// affected means another writer got there first.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: DatabasePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn encode(state: &RunState) -> Result<String, RepositoryError> {
    serde_json::to_string(state)
        .map_err(|e| RepositoryError::Query(format!("serialize run state: {e}")))
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<RunState, RepositoryError> {
    let state: String = row
        .try_get("state")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&state)
        .map_err(|e| RepositoryError::Query(format!("invalid run state JSON: {e}")))
}

impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, run_id: Uuid) -> Result<Option<RunState>, RepositoryError> {
        let row = sqlx::query("SELECT state FROM run_states WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode).transpose()
    }

    async fn put(&self, state: &RunState) -> Result<(), RepositoryError> {
        let json = encode(state)?;

        sqlx::query(
            "INSERT INTO run_states (run_id, version, status, state, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(state.run_id.to_string())
        .bind(state.version as i64)
        .bind(state.status.to_string())
        .bind(&json)
        .bind(format_datetime(&state.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            insert_error(e, || format!("run {} already has a state record", state.run_id))
        })?;

        tracing::debug!(run_id = %state.run_id, "created run state");
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        run_id: Uuid,
        expected_version: u64,
        state: &RunState,
    ) -> Result<u64, RepositoryError> {
        let next_version = expected_version + 1;
        let mut next = state.clone();
        next.version = next_version;
        let json = encode(&next)?;

        let result = sqlx::query(
            r#"UPDATE run_states
               SET version = ?, status = ?, state = ?, updated_at = ?
               WHERE run_id = ? AND version = ?"#,
        )
        .bind(next_version as i64)
        .bind(next.status.to_string())
        .bind(&json)
        .bind(format_datetime(&next.updated_at))
        .bind(run_id.to_string())
        .bind(expected_version as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "run {run_id} is not at version {expected_version}"
            )));
        }

        tracing::debug!(run_id = %run_id, version = next_version, "checkpointed run state");
        Ok(next_version)
    }

    async fn list(&self) -> Result<Vec<RunState>, RepositoryError> {
        let rows = sqlx::query("SELECT state FROM run_states ORDER BY updated_at DESC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::database_url;
    use crate::testing;
    use phaseflow_types::run::RunStatus;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::new(&database_url(dir.path())).await.unwrap();
        // Keep the tempdir alive by leaking it (test only)
        std::mem::forget(dir);
        pool
    }

    #[tokio::test]
    async fn honours_checkpoint_contract() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        testing::checkpoint_contract(&store).await;
    }

    #[tokio::test]
    async fn status_column_tracks_the_document() {
        let pool = test_pool().await;
        let store = SqliteCheckpointStore::new(pool.clone());
        let state = testing::sample_state();
        store.put(&state).await.unwrap();

        let mut paused = state.clone();
        paused.status = RunStatus::Paused;
        store
            .compare_and_swap(state.run_id, state.version, &paused)
            .await
            .unwrap();

        let row: (String, i64) =
            sqlx::query_as("SELECT status, version FROM run_states WHERE run_id = ?")
                .bind(state.run_id.to_string())
                .fetch_one(&pool.reader)
                .await
                .unwrap();
        assert_eq!(row, ("paused".to_string(), 2));
    }

    #[tokio::test]
    async fn list_orders_most_recent_first() {
        let store = SqliteCheckpointStore::new(test_pool().await);
        let older = testing::sample_state();
        let mut newer = testing::sample_state();
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);

        store.put(&older).await.unwrap();
        store.put(&newer).await.unwrap();

        let ids: Vec<Uuid> = store.list().await.unwrap().iter().map(|s| s.run_id).collect();
        assert_eq!(ids, [newer.run_id, older.run_id]);
    }
}
