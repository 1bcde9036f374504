//! Decision channels: where a paused gate gets its answer.
//!
//! Without a channel the engine persists the question and returns a paused
//! report; the answer arrives later through `Engine::record_decision`. With
//! a channel (an interactive terminal, an embedding application) the engine
//! awaits the answer inline and keeps going.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use phaseflow_types::decision::{Decision, DecisionRequest};
use tokio::sync::oneshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DecisionError {
    /// The channel can no longer answer (closed terminal, dropped queue).
    #[error("decision channel closed")]
    Closed,

    /// The human declined to answer now; the run should pause instead.
    #[error("decision deferred")]
    Deferred,

    #[error("decision channel I/O error: {0}")]
    Io(String),
}

/// Source of answers for decision requests.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait DecisionChannel: Send + Sync {
    fn await_decision(
        &self,
        request: &DecisionRequest,
    ) -> impl Future<Output = Result<Decision, DecisionError>> + Send;
}

// ---------------------------------------------------------------------------
// BoxDecisionChannel
// ---------------------------------------------------------------------------

/// Object-safe version of [`DecisionChannel`] with boxed futures.
pub trait DecisionChannelDyn: Send + Sync {
    fn await_decision_boxed<'a>(
        &'a self,
        request: &'a DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Decision, DecisionError>> + Send + 'a>>;
}

impl<T: DecisionChannel> DecisionChannelDyn for T {
    fn await_decision_boxed<'a>(
        &'a self,
        request: &'a DecisionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Decision, DecisionError>> + Send + 'a>> {
        Box::pin(self.await_decision(request))
    }
}

/// Type-erased decision channel, selected at runtime by the caller.
pub struct BoxDecisionChannel {
    inner: Box<dyn DecisionChannelDyn + Send + Sync>,
}

impl BoxDecisionChannel {
    pub fn new<T: DecisionChannel + 'static>(channel: T) -> Self {
        Self {
            inner: Box::new(channel),
        }
    }

    pub async fn await_decision(&self, request: &DecisionRequest) -> Result<Decision, DecisionError> {
        self.inner.await_decision_boxed(request).await
    }
}

impl std::fmt::Debug for BoxDecisionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDecisionChannel").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// QueuedDecisionChannel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Queue {
    waiting: HashMap<String, oneshot::Sender<Decision>>,
    early: HashMap<String, Decision>,
}

/// In-process channel answered by another task through [`answer`].
///
/// Answers that arrive before the engine asks are held until it does.
/// Cloning shares the queue.
///
/// [`answer`]: QueuedDecisionChannel::answer
#[derive(Clone, Default)]
pub struct QueuedDecisionChannel {
    queue: Arc<Mutex<Queue>>,
}

impl QueuedDecisionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an answer. Returns `true` when a waiting request consumed it.
    pub fn answer(&self, decision: Decision) -> bool {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        match queue.waiting.remove(&decision.decision_id) {
            Some(sender) => sender.send(decision).is_ok(),
            None => {
                queue.early.insert(decision.decision_id.clone(), decision);
                false
            }
        }
    }

    /// Decision ids the engine is currently waiting on.
    pub fn pending(&self) -> Vec<String> {
        let queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = queue.waiting.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl DecisionChannel for QueuedDecisionChannel {
    async fn await_decision(&self, request: &DecisionRequest) -> Result<Decision, DecisionError> {
        let receiver = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(decision) = queue.early.remove(&request.decision_id) {
                return Ok(decision);
            }
            let (sender, receiver) = oneshot::channel();
            queue.waiting.insert(request.decision_id.clone(), sender);
            receiver
        };
        receiver.await.map_err(|_| DecisionError::Closed)
    }
}

impl std::fmt::Debug for QueuedDecisionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedDecisionChannel")
            .field("pending", &self.pending())
            .finish()
    }
}
