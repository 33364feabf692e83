//! Queue Throttle Library
//!
//! Drains named work queues under a fixed-window rate limit ("N items per
//! unit") and a wall-clock budget, routing each item on its worker's outcome.

pub mod clock;
pub mod config;
pub mod cron;
pub mod drain;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod rate;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cron::{CronReport, QueueThrottleCron};
pub use drain::{DrainExit, DrainSummary, ExecutionContext, ThrottledDrainer};
pub use error::{QueueError, Result, ThrottleError};
pub use queue::{MemoryQueue, Queue, QueueItem, QueueRegistry};
pub use rate::{ThrottleRate, TimeUnit};
pub use worker::{CommandWorker, FnWorker, QueueWorker, WorkerOutcome};
