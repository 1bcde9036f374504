//! Plan store trait definition.

use phaseflow_types::error::RepositoryError;
use phaseflow_types::plan::ExecutionPlan;
use uuid::Uuid;

/// Write-once storage for compiled plans, addressable by run id alone.
pub trait PlanStore: Send + Sync {
    /// Persist a plan. Fails with `Conflict` if the run already has one.
    fn save(
        &self,
        plan: &ExecutionPlan,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionPlan>, RepositoryError>> + Send;
}
