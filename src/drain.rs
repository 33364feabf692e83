//! Throttled Draining
//!
//! [`ThrottledDrainer`] claims items from one queue, hands them to the queue's
//! worker and enforces a fixed-window token budget and an optional deadline.
//!
//! # Windowing
//!
//! The budget is `rate.tokens()` successful items per `rate.window()`. The
//! window restarts at the first check that finds it elapsed, so up to twice the
//! budget can pass in quick succession around a boundary. Items claimed while
//! the budget is spent are released untouched and claimed again later.
//!
//! Deferral does not sleep: until the window ends the loop keeps claiming,
//! releasing and yielding. Every such release is counted in
//! `queue_items_throttled_total`, so a slow rate with a long budget shows a
//! high throttled count. Only the first deferral of each window is traced.
//!
//! A time budget too large to be represented as an `Instant` is treated as
//! unbounded.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, ThrottleError};
use crate::metrics;
use crate::queue::{Queue, QueueRegistry};
use crate::rate::ThrottleRate;
use crate::worker::{QueueWorker, WorkerOutcome};

/// Identity drains run under when none is given
pub const ANONYMOUS_ACCOUNT: &str = "anonymous";

/// Explicit per-call execution settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Identity the run is attributed to
    pub account: String,

    /// Total run time; zero means unbounded
    pub time_budget: Duration,

    /// Lease requested on each claim; `None` uses the queue default
    pub lease: Option<Duration>,

    /// Log every dispatched item
    pub detailed_logging: bool,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            account: ANONYMOUS_ACCOUNT.to_string(),
            time_budget: Duration::ZERO,
            lease: None,
            detailed_logging: false,
        }
    }
}

impl ExecutionContext {
    /// Context with a time budget in whole seconds (0 = unbounded)
    pub fn with_time_budget_secs(secs: u64) -> Self {
        Self {
            time_budget: Duration::from_secs(secs),
            ..Self::default()
        }
    }

    pub fn lease(mut self, lease: Option<Duration>) -> Self {
        self.lease = lease;
        self
    }

    pub fn detailed_logging(mut self, enabled: bool) -> Self {
        self.detailed_logging = enabled;
        self
    }

    pub fn account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }
}

/// Why a drain stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainExit {
    /// Time budget exhausted
    Deadline,
    /// Nothing left to claim
    Empty,
}

impl DrainExit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainExit::Deadline => "deadline",
            DrainExit::Empty => "empty",
        }
    }
}

/// Outcome of a completed drain call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainSummary {
    pub queue: String,
    /// Items processed and deleted
    pub processed: u64,
    /// Claims released because the window budget was spent
    pub throttled: u64,
    /// Items released on worker request
    pub requeued: u64,
    /// Items whose processing failed
    pub failed: u64,
    pub elapsed: Duration,
    pub exit: DrainExit,
}

/// Mutable state of one drain call
#[derive(Debug)]
struct DrainRun {
    started: Instant,
    window_start: Instant,
    deadline: Option<Instant>,
    consumed_in_window: u32,
    throttled_in_window: u64,
    processed: u64,
    throttled: u64,
    requeued: u64,
    failed: u64,
}

impl DrainRun {
    fn start(now: Instant, time_budget: Duration) -> Self {
        Self {
            started: now,
            window_start: now,
            deadline: if time_budget.is_zero() {
                None
            } else {
                now.checked_add(time_budget)
            },
            consumed_in_window: 0,
            throttled_in_window: 0,
            processed: 0,
            throttled: 0,
            requeued: 0,
            failed: 0,
        }
    }

    fn past_deadline(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Start a new window once the current one has elapsed
    fn roll_window(&mut self, now: Instant, window: Duration) -> bool {
        if now.saturating_duration_since(self.window_start) >= window {
            self.window_start = now;
            self.consumed_in_window = 0;
            self.throttled_in_window = 0;
            true
        } else {
            false
        }
    }

    fn budget_spent(&self, tokens: u32) -> bool {
        self.consumed_in_window >= tokens
    }

    /// Count a deferred claim; true for the first one in the current window
    fn defer(&mut self) -> bool {
        self.throttled += 1;
        self.throttled_in_window += 1;
        self.throttled_in_window == 1
    }

    fn consume(&mut self) {
        self.consumed_in_window += 1;
        self.processed += 1;
    }

    fn finish(self, queue: &str, now: Instant, exit: DrainExit) -> DrainSummary {
        DrainSummary {
            queue: queue.to_string(),
            processed: self.processed,
            throttled: self.throttled,
            requeued: self.requeued,
            failed: self.failed,
            elapsed: now.saturating_duration_since(self.started),
            exit,
        }
    }
}

/// Drains named queues under a rate and time ceiling
#[derive(Debug, Clone)]
pub struct ThrottledDrainer {
    registry: Arc<QueueRegistry>,
    clock: Arc<dyn Clock>,
}

impl ThrottledDrainer {
    /// Create a drainer on the system clock
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self::with_clock(registry, Arc::new(SystemClock))
    }

    pub fn with_clock(registry: Arc<QueueRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    pub fn registry(&self) -> &QueueRegistry {
        &self.registry
    }

    /// Drain `queue_name` for up to `time_budget_secs` seconds (0 = until empty)
    ///
    /// # Errors
    ///
    /// - `QueueNotFound` if no queue is registered under the name
    /// - `QueueSuspended` if the worker suspended the queue
    /// - `Queue` if the queue backend fails
    pub async fn drain(
        &self,
        queue_name: &str,
        time_budget_secs: u64,
        rate: &ThrottleRate,
        detailed_logging: bool,
    ) -> Result<DrainSummary> {
        let ctx = ExecutionContext::with_time_budget_secs(time_budget_secs)
            .detailed_logging(detailed_logging);
        self.drain_with_context(queue_name, rate, &ctx).await
    }

    /// Drain a registered queue with an explicit execution context
    pub async fn drain_with_context(
        &self,
        queue_name: &str,
        rate: &ThrottleRate,
        ctx: &ExecutionContext,
    ) -> Result<DrainSummary> {
        let entry = self.registry.get(queue_name)?;
        self.drain_queue(queue_name, entry.queue.as_ref(), entry.worker.as_ref(), rate, ctx)
            .await
    }

    /// Run the throttled claim/process loop against `queue` and `worker`
    pub async fn drain_queue(
        &self,
        queue_name: &str,
        queue: &dyn Queue,
        worker: &dyn QueueWorker,
        rate: &ThrottleRate,
        ctx: &ExecutionContext,
    ) -> Result<DrainSummary> {
        let mut run = DrainRun::start(self.clock.now(), ctx.time_budget);
        debug!(
            queue = queue_name,
            account = %ctx.account,
            "Draining at {} ({:.3} items/sec), budget {:?}",
            rate,
            rate.tokens_per_second(),
            ctx.time_budget
        );

        let exit = loop {
            if run.past_deadline(self.clock.now()) {
                break DrainExit::Deadline;
            }

            let Some(item) = queue.claim_item(ctx.lease).await? else {
                break DrainExit::Empty;
            };

            if run.roll_window(self.clock.now(), rate.window()) {
                trace!(queue = queue_name, "Throttle window reset");
            }

            if run.budget_spent(rate.tokens()) {
                queue.release_item(&item).await?;
                metrics::ITEMS_THROTTLED_TOTAL
                    .with_label_values(&[queue_name])
                    .inc();
                if run.defer() {
                    trace!(queue = queue_name, item_id = item.id, "Window budget spent, deferring");
                }
                tokio::task::yield_now().await;
                continue;
            }

            if ctx.detailed_logging {
                info!(
                    queue = queue_name,
                    item_id = item.id,
                    "Processing item {} from {} queue.",
                    item.id,
                    queue_name
                );
            }

            let outcome = worker.process_item(&item.data).await;
            trace!(queue = queue_name, item_id = item.id, outcome = outcome.label(), "Worker returned");

            match outcome {
                WorkerOutcome::Processed => {
                    queue.delete_item(&item).await?;
                    run.consume();
                    metrics::ITEMS_PROCESSED_TOTAL
                        .with_label_values(&[queue_name])
                        .inc();
                }
                WorkerOutcome::Requeue => {
                    queue.release_item(&item).await?;
                    run.requeued += 1;
                    metrics::ITEMS_REQUEUED_TOTAL
                        .with_label_values(&[queue_name])
                        .inc();
                    debug!(queue = queue_name, item_id = item.id, "Worker requested requeue");
                }
                WorkerOutcome::Suspend(reason) => {
                    queue.release_item(&item).await?;
                    metrics::QUEUE_SUSPENSIONS_TOTAL
                        .with_label_values(&[queue_name])
                        .inc();
                    warn!(
                        queue = queue_name,
                        item_id = item.id,
                        processed = run.processed,
                        "Queue suspended by worker: {}",
                        reason
                    );
                    return Err(ThrottleError::QueueSuspended {
                        queue: queue_name.to_string(),
                        reason,
                        processed: run.processed,
                    });
                }
                WorkerOutcome::Failed(e) => {
                    // Leave the item leased; it is retried once the lease lapses
                    run.failed += 1;
                    metrics::ITEMS_FAILED_TOTAL
                        .with_label_values(&[queue_name])
                        .inc();
                    error!(
                        queue = queue_name,
                        item_id = item.id,
                        "Failed to process item: {:#}",
                        e
                    );
                }
            }
        };

        let summary = run.finish(queue_name, self.clock.now(), exit);
        metrics::DRAIN_DURATION_SECONDS
            .with_label_values(&[queue_name, exit.as_str()])
            .observe(summary.elapsed.as_secs_f64());
        info!(
            queue = queue_name,
            "Processed {} items from the {} queue in {:.2} sec.",
            summary.processed,
            queue_name,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }
}
