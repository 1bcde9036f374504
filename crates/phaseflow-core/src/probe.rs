//! Repository branch probe.
//!
//! Guards are pure, so the engine asks the probe for the current branch
//! before running Branch Safety and hands the answer to the guard.

use std::future::Future;
use std::pin::Pin;

/// Reports the branch the working tree is on.
pub trait BranchProbe: Send + Sync {
    /// `None` when the branch cannot be determined (detached HEAD, no
    /// repository, probe failure). Branch Safety treats `None` as unsafe.
    fn current_branch(&self) -> impl Future<Output = Option<String>> + Send;
}

/// A probe with a fixed answer, for embedding and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedBranchProbe(pub Option<String>);

impl FixedBranchProbe {
    pub fn on(branch: impl Into<String>) -> Self {
        Self(Some(branch.into()))
    }
}

impl BranchProbe for FixedBranchProbe {
    async fn current_branch(&self) -> Option<String> {
        self.0.clone()
    }
}

// ---------------------------------------------------------------------------
// BoxBranchProbe
// ---------------------------------------------------------------------------

/// Object-safe version of [`BranchProbe`] with boxed futures.
pub trait BranchProbeDyn: Send + Sync {
    fn current_branch_boxed<'a>(&'a self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;
}

impl<T: BranchProbe> BranchProbeDyn for T {
    fn current_branch_boxed<'a>(&'a self) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(self.current_branch())
    }
}

/// Type-erased probe so the engine does not carry another generic.
pub struct BoxBranchProbe {
    inner: Box<dyn BranchProbeDyn + Send + Sync>,
}

impl BoxBranchProbe {
    pub fn new<T: BranchProbe + 'static>(probe: T) -> Self {
        Self {
            inner: Box::new(probe),
        }
    }

    pub async fn current_branch(&self) -> Option<String> {
        self.inner.current_branch_boxed().await
    }
}

impl std::fmt::Debug for BoxBranchProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxBranchProbe").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn boxed_probe_delegates() {
        let probe = BoxBranchProbe::new(FixedBranchProbe::on("feature/login"));
        assert_eq!(probe.current_branch().await.as_deref(), Some("feature/login"));

        let unknown = BoxBranchProbe::new(FixedBranchProbe::default());
        assert!(unknown.current_branch().await.is_none());
    }
}
