//! In-memory queue
//!
//! FIFO by item id. Leases are measured on the injected clock, so an expired
//! lease makes the item claimable again without any garbage-collection pass.
//! A lease that would end past the clock's range holds until the item is
//! released or deleted.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Queue, QueueItem, DEFAULT_LEASE};
use crate::clock::{Clock, SystemClock};
use crate::error::QueueResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lease {
    Free,
    Until(Instant),
    Indefinite,
}

impl Lease {
    fn starting(now: Instant, length: Duration) -> Self {
        now.checked_add(length).map_or(Lease::Indefinite, Lease::Until)
    }

    fn is_claimable(&self, now: Instant) -> bool {
        match self {
            Lease::Free => true,
            Lease::Until(until) => *until <= now,
            Lease::Indefinite => false,
        }
    }
}

#[derive(Debug)]
struct Slot {
    item: QueueItem,
    lease: Lease,
}

#[derive(Debug, Default)]
struct QueueState {
    slots: BTreeMap<u64, Slot>,
    next_id: u64,
}

/// Process-local FIFO-with-lease queue
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    name: String,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    /// Create an empty queue on the system clock
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    /// Create an empty queue whose leases are measured on `clock`
    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            state: Arc::new(Mutex::new(QueueState {
                slots: BTreeMap::new(),
                next_id: 1,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load one JSON payload per non-empty line of `path`.
    ///
    /// A missing file yields an empty queue.
    pub async fn load_jsonl(name: impl Into<String>, path: &Path) -> QueueResult<Self> {
        let queue = Self::new(name);
        if !path.exists() {
            debug!(queue = %queue.name, "Spool file {:?} not found, starting empty", path);
            return Ok(queue);
        }

        let content = tokio::fs::read_to_string(path).await?;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let data: serde_json::Value = serde_json::from_str(line)?;
            queue.create_item(data).await?;
        }
        debug!(queue = %queue.name, "Loaded {} items from {:?}", queue.len().await, path);
        Ok(queue)
    }

    /// Write every remaining payload, leased ones included, to `path`
    pub async fn save_jsonl(&self, path: &Path) -> QueueResult<()> {
        let state = self.state.lock().await;
        let mut out = String::new();
        for slot in state.slots.values() {
            out.push_str(&serde_json::to_string(&slot.item.data)?);
            out.push('\n');
        }
        drop(state);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, out).await?;
        Ok(())
    }

    /// Number of items, leased ones included
    pub async fn len(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Payloads in queue order
    pub async fn payloads(&self) -> Vec<serde_json::Value> {
        let state = self.state.lock().await;
        state.slots.values().map(|s| s.item.data.clone()).collect()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn create_item(&self, data: serde_json::Value) -> QueueResult<u64> {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.slots.insert(
            id,
            Slot {
                item: QueueItem {
                    id,
                    data,
                    created: Utc::now(),
                },
                lease: Lease::Free,
            },
        );
        Ok(id)
    }

    async fn number_of_items(&self) -> QueueResult<usize> {
        Ok(self.len().await)
    }

    async fn claim_item(&self, lease: Option<Duration>) -> QueueResult<Option<QueueItem>> {
        let now = self.clock.now();
        let lease = lease.unwrap_or(DEFAULT_LEASE);
        let mut state = self.state.lock().await;

        let claimable = state
            .slots
            .values_mut()
            .find(|slot| slot.lease.is_claimable(now));

        Ok(claimable.map(|slot| {
            slot.lease = Lease::starting(now, lease);
            slot.item.clone()
        }))
    }

    async fn release_item(&self, item: &QueueItem) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        match state.slots.get_mut(&item.id) {
            Some(slot) => {
                slot.lease = Lease::Free;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_item(&self, item: &QueueItem) -> QueueResult<()> {
        self.state.lock().await.slots.remove(&item.id);
        Ok(())
    }
}
