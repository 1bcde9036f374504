//! SQLite plan store over the `plans` table.

use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::plan::ExecutionPlan;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, insert_error};

/// SQLite-backed implementation of `PlanStore`.
#[derive(Debug, Clone)]
pub struct SqlitePlanStore {
    pool: DatabasePool,
}

impl SqlitePlanStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl PlanStore for SqlitePlanStore {
    async fn save(&self, plan: &ExecutionPlan) -> Result<(), RepositoryError> {
        let json = serde_json::to_string(plan)
            .map_err(|e| RepositoryError::Query(format!("serialize plan: {e}")))?;

        sqlx::query(
            "INSERT INTO plans (run_id, plan_id, workflow_id, plan, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(plan.run_id.to_string())
        .bind(plan.plan_id.to_string())
        .bind(&plan.workflow_id)
        .bind(&json)
        .bind(format_datetime(&plan.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| insert_error(e, || format!("run {} already has a plan", plan.run_id)))?;

        tracing::debug!(run_id = %plan.run_id, "saved execution plan");
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<ExecutionPlan>, RepositoryError> {
        let row = sqlx::query("SELECT plan FROM plans WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let json: String = row
                    .try_get("plan")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| RepositoryError::Query(format!("invalid plan JSON: {e}")))
            }
            None => Ok(None),
        }
    }
}
