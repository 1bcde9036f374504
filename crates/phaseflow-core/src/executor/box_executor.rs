//! BoxStepExecutor -- object-safe dynamic dispatch wrapper for StepExecutor.
//!
//! 1. Define an object-safe `StepExecutorDyn` trait with boxed futures
//! 2. Blanket-impl `StepExecutorDyn` for all `T: StepExecutor`
//! 3. `BoxStepExecutor` wraps `Box<dyn StepExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use phaseflow_types::step::StepResult;

use super::{StepExecutor, StepExecutorError, StepRequest};

/// Object-safe version of [`StepExecutor`] with boxed futures.
pub trait StepExecutorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        request: &'a StepRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepExecutorError>> + Send + 'a>>;
}

impl<T: StepExecutor> StepExecutorDyn for T {
    fn name(&self) -> &str {
        StepExecutor::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        request: &'a StepRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepExecutorError>> + Send + 'a>> {
        Box::pin(self.execute(request))
    }
}

/// Type-erased step executor for runtime executor selection.
///
/// Since `StepExecutor` uses RPITIT, it cannot be used as a trait object
/// directly. `BoxStepExecutor` provides the same methods and delegates to
/// the inner `StepExecutorDyn` trait object.
pub struct BoxStepExecutor {
    inner: Box<dyn StepExecutorDyn + Send + Sync>,
}

impl BoxStepExecutor {
    pub fn new<T: StepExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(&self, request: &StepRequest) -> Result<StepResult, StepExecutorError> {
        self.inner.execute_boxed(request).await
    }
}

impl std::fmt::Debug for BoxStepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxStepExecutor")
            .field("name", &self.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request_for, ScriptedExecutor};

    #[tokio::test]
    async fn boxed_executor_delegates() {
        let scripted = ScriptedExecutor::new().script("review", vec![StepResult::warning("lint")]);
        let boxed = BoxStepExecutor::new(scripted.clone());
        assert_eq!(boxed.name(), "scripted");

        let first = boxed.execute(&request_for("review")).await.unwrap();
        assert_eq!(first.message, "lint");
        let second = boxed.execute(&request_for("review")).await.unwrap();
        assert_eq!(second.status, phaseflow_types::step::StepOutcome::Success);
        assert_eq!(scripted.calls("review"), 2);
    }
}
