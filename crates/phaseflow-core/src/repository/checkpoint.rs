//! Checkpoint store trait definition.

use phaseflow_types::error::RepositoryError;
use phaseflow_types::run::RunState;
use uuid::Uuid;

/// Durable key-value store for `RunState`, keyed by run id.
///
/// Every backend must honor compare-and-swap so that at most one writer
/// succeeds per version.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait CheckpointStore: Send + Sync {
    /// Current state for a run, or `None` if the run is unknown.
    fn get(
        &self,
        run_id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RunState>, RepositoryError>> + Send;

    /// Create the state record. Fails with `Conflict` if one already exists.
    fn put(
        &self,
        state: &RunState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace the stored state only if its version equals `expected_version`.
    ///
    /// The stored copy gets version `expected_version + 1`, which is
    /// returned. The `version` field of `state` is ignored. A mismatch (or a
    /// missing record) fails with `Conflict` and leaves the store untouched.
    fn compare_and_swap(
        &self,
        run_id: Uuid,
        expected_version: u64,
        state: &RunState,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// All known runs, most recently updated first.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<RunState>, RepositoryError>> + Send;
}
