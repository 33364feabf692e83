//! Work Queues
//!
//! The drain loop only needs claim, release and delete on a queue. Storage is
//! pluggable behind [`Queue`]; [`MemoryQueue`] is the in-process backend and
//! [`QueueRegistry`] maps queue names to a backend plus its worker.
//!
//! # Lease contract
//!
//! A claimed item must not be handed to another claimant until it is released,
//! deleted, or its lease has expired.

pub mod memory;
pub mod registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::QueueResult;

pub use memory::MemoryQueue;
pub use registry::{QueueRegistry, RegisteredQueue};

/// Lease applied when a claim does not request one (one hour)
pub const DEFAULT_LEASE: Duration = Duration::from_secs(3_600);

/// An item claimed from a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Backend-assigned identifier
    pub id: u64,

    /// Payload handed to the worker unchanged
    pub data: serde_json::Value,

    /// When the item was enqueued
    pub created: DateTime<Utc>,
}

/// FIFO queue with leased claims
#[async_trait]
pub trait Queue: Send + Sync {
    /// Append an item, returning its id
    async fn create_item(&self, data: serde_json::Value) -> QueueResult<u64>;

    /// Number of items in the queue, leased ones included
    async fn number_of_items(&self) -> QueueResult<usize>;

    /// Claim the oldest unleased item for `lease` (or the backend default)
    async fn claim_item(&self, lease: Option<Duration>) -> QueueResult<Option<QueueItem>>;

    /// Drop the lease so the item can be claimed again. Returns false if the
    /// item is no longer in the queue.
    async fn release_item(&self, item: &QueueItem) -> QueueResult<bool>;

    /// Remove a processed item
    async fn delete_item(&self, item: &QueueItem) -> QueueResult<()>;

    /// Make sure backing storage exists. Idempotent.
    async fn create_queue(&self) -> QueueResult<()> {
        Ok(())
    }
}
