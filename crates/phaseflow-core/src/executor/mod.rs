//! Step executor port.
//!
//! The engine never interprets a step's instruction. It hands a
//! [`StepRequest`] to whatever executor was wired in and acts on the
//! [`StepResult`] that comes back.

pub mod box_executor;

pub use box_executor::BoxStepExecutor;

use std::collections::BTreeMap;

use phaseflow_types::plan::StepPayload;
use phaseflow_types::step::StepResult;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One dispatch of one step.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub run_id: Uuid,
    pub phase: String,
    pub step_id: String,
    pub name: String,
    pub payload: StepPayload,
    pub arguments: BTreeMap<String, String>,
    pub context: Option<String>,
    /// 1-based; increments on every retry and re-dispatch.
    pub attempt: u32,
    /// Answer to the step's last `needs_input` request, if any.
    pub input: Option<String>,
    /// Cancelled when the run is aborted. Executors that spawn work should
    /// stop it when this fires.
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StepExecutorError {
    #[error("unsupported step: {0}")]
    Unsupported(String),

    #[error("failed to launch step: {0}")]
    Spawn(String),

    #[error("malformed executor output: {0}")]
    Protocol(String),

    #[error("step execution cancelled")]
    Cancelled,
}

/// Runs a single step.
///
/// An `Err` is an infrastructure failure and is treated like a `failure`
/// result (retryable within the phase budget). A step that ran and failed
/// should return `Ok(StepResult::failure(..))`.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait StepExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn execute(
        &self,
        request: &StepRequest,
    ) -> impl std::future::Future<Output = Result<StepResult, StepExecutorError>> + Send;
}
