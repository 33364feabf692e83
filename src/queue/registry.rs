//! Queue Registry
//!
//! Maps a queue name to its backend and the worker that processes its items.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::Queue;
use crate::error::{Result, ThrottleError};
use crate::worker::QueueWorker;

/// A queue backend together with its worker
#[derive(Clone)]
pub struct RegisteredQueue {
    pub queue: Arc<dyn Queue>,
    pub worker: Arc<dyn QueueWorker>,
}

impl fmt::Debug for RegisteredQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredQueue").finish_non_exhaustive()
    }
}

/// Named queues known to this process
#[derive(Debug, Clone, Default)]
pub struct QueueRegistry {
    entries: HashMap<String, RegisteredQueue>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the queue and worker for `name`
    pub fn register(
        &mut self,
        name: impl Into<String>,
        queue: Arc<dyn Queue>,
        worker: Arc<dyn QueueWorker>,
    ) {
        self.entries
            .insert(name.into(), RegisteredQueue { queue, worker });
    }

    /// Look up a queue by name
    pub fn get(&self, name: &str) -> Result<RegisteredQueue> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ThrottleError::QueueNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::worker::{FnWorker, WorkerOutcome};

    fn worker() -> Arc<dyn QueueWorker> {
        Arc::new(FnWorker::new(|_| WorkerOutcome::Processed))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = QueueRegistry::new();
        assert!(registry.is_empty());

        registry.register("zeta", Arc::new(MemoryQueue::new("zeta")), worker());
        registry.register("alpha", Arc::new(MemoryQueue::new("alpha")), worker());

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("alpha"));
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
        assert!(registry.get("zeta").is_ok());
    }

    #[test]
    fn test_unknown_queue() {
        let registry = QueueRegistry::new();
        let err = registry.get("missing").unwrap_err();
        assert!(matches!(err, ThrottleError::QueueNotFound(name) if name == "missing"));
    }
}
