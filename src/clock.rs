//! Monotonic clocks
//!
//! The drain loop and the in-memory queue read time through [`Clock`] so that
//! window and lease arithmetic can be driven deterministically in tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic, sub-second timestamps
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually driven clock.
///
/// Time only moves through [`ManualClock::advance`], or by the configured step
/// which is applied after every [`Clock::now`] read. Clones share one time line.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    inner: Arc<ManualInner>,
}

#[derive(Debug, Default)]
struct ManualInner {
    offset_nanos: AtomicU64,
    step_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            inner: Arc::new(ManualInner::default()),
        }
    }

    /// Clock that advances by `step` on each `now()` call
    pub fn with_step(step: Duration) -> Self {
        let clock = Self::new();
        clock.set_step(step);
        clock
    }

    pub fn set_step(&self, step: Duration) {
        self.inner
            .step_nanos
            .store(duration_nanos(step), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.inner
            .offset_nanos
            .fetch_add(duration_nanos(by), Ordering::SeqCst);
    }

    /// Current time without applying the step
    pub fn peek(&self) -> Instant {
        self.origin + Duration::from_nanos(self.inner.offset_nanos.load(Ordering::SeqCst))
    }

    /// Time elapsed on this clock since it was created
    pub fn elapsed(&self) -> Duration {
        self.peek().duration_since(self.origin)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let step = self.inner.step_nanos.load(Ordering::SeqCst);
        let offset = self.inner.offset_nanos.fetch_add(step, Ordering::SeqCst);
        self.origin + Duration::from_nanos(offset)
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
