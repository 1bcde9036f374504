//! `plan.json` plan store.

use std::path::Path;

use phaseflow_core::repository::plan::PlanStore;
use phaseflow_types::error::RepositoryError;
use phaseflow_types::plan::ExecutionPlan;
use uuid::Uuid;

use super::{RunDirectory, blocking, parse_json, read_optional, with_run_lock, write_atomic};

/// File-backed implementation of `PlanStore`.
#[derive(Debug, Clone)]
pub struct FilePlanStore {
    layout: RunDirectory,
}

impl FilePlanStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            layout: RunDirectory::new(data_dir),
        }
    }
}

impl PlanStore for FilePlanStore {
    async fn save(&self, plan: &ExecutionPlan) -> Result<(), RepositoryError> {
        let run_id = plan.run_id;
        let run_dir = self.layout.run_dir(run_id);
        let path = self.layout.plan_path(run_id);
        let bytes = serde_json::to_vec_pretty(plan)
            .map_err(|e| RepositoryError::Query(format!("failed to encode plan: {e}")))?;

        blocking(move || {
            with_run_lock(&run_dir, || {
                if path.exists() {
                    return Err(RepositoryError::Conflict(format!(
                        "run {run_id} already has a plan"
                    )));
                }
                write_atomic(&path, &bytes)
            })
        })
        .await?;

        tracing::debug!(run_id = %run_id, "saved execution plan");
        Ok(())
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<ExecutionPlan>, RepositoryError> {
        let path = self.layout.plan_path(run_id);
        blocking(move || {
            read_optional(&path)?
                .map(|content| parse_json(&path, &content))
                .transpose()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use tempfile::tempdir;

    #[tokio::test]
    async fn honours_plan_store_contract() {
        let dir = tempdir().unwrap();
        testing::plan_store_contract(&FilePlanStore::new(dir.path())).await;
    }

    #[tokio::test]
    async fn plan_document_uses_the_documented_field_names() {
        let dir = tempdir().unwrap();
        let store = FilePlanStore::new(dir.path());
        let plan = testing::sample_plan();
        store.save(&plan).await.unwrap();

        let raw = std::fs::read_to_string(RunDirectory::new(dir.path()).plan_path(plan.run_id))
            .unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        for field in [
            "run_id",
            "work_reference",
            "workflow_id",
            "inheritance_chain",
            "autonomy_level",
            "phases",
        ] {
            assert!(doc.get(field).is_some(), "missing {field}");
        }
        let step = &doc["phases"][0]["steps"][0];
        assert_eq!(step["id"], "implement");
        assert!(step.get("result_handling").is_some());
        assert_eq!(doc["phases"][0]["max_retries"], 2);
    }
}
