// Queue workers
//
// A worker processes one payload and answers with a WorkerOutcome. The drain
// loop routes the item on that answer: delete, release, or stop the queue.

pub mod command;

use async_trait::async_trait;
use std::fmt;

pub use command::CommandWorker;

/// Result of processing a single payload
#[derive(Debug)]
pub enum WorkerOutcome {
    /// Done; the item is deleted and consumes a token
    Processed,
    /// Put the item straight back for redelivery
    Requeue,
    /// The whole queue is unusable for now; stop draining it
    Suspend(String),
    /// Item-level failure; logged, the lease is left to lapse
    Failed(anyhow::Error),
}

impl WorkerOutcome {
    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            WorkerOutcome::Processed => "processed",
            WorkerOutcome::Requeue => "requeue",
            WorkerOutcome::Suspend(_) => "suspend",
            WorkerOutcome::Failed(_) => "failed",
        }
    }
}

impl From<anyhow::Result<()>> for WorkerOutcome {
    fn from(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => WorkerOutcome::Processed,
            Err(e) => WorkerOutcome::Failed(e),
        }
    }
}

/// Processes queue payloads
#[async_trait]
pub trait QueueWorker: Send + Sync {
    async fn process_item(&self, data: &serde_json::Value) -> WorkerOutcome;
}

/// Worker backed by a plain closure
pub struct FnWorker<F> {
    f: F,
}

impl<F> FnWorker<F>
where
    F: Fn(&serde_json::Value) -> WorkerOutcome + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnWorker<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorker").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> QueueWorker for FnWorker<F>
where
    F: Fn(&serde_json::Value) -> WorkerOutcome + Send + Sync,
{
    async fn process_item(&self, data: &serde_json::Value) -> WorkerOutcome {
        (self.f)(data)
    }
}
