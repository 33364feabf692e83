//! Scheduled Pass
//!
//! [`QueueThrottleCron`] drains every enabled queue once, one after another,
//! under the queue's configured rate and time. Only one pass runs at a time
//! per process; an overlapping call returns immediately.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::drain::{DrainSummary, ExecutionContext, ThrottledDrainer};
use crate::error::ThrottleError;
use crate::metrics;

/// In-process overlap lock
#[derive(Debug, Default)]
struct CronLock {
    held: AtomicBool,
}

impl CronLock {
    fn try_acquire(&self) -> Option<CronLockGuard<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CronLockGuard { lock: self })
    }
}

/// Releases the lock on drop
struct CronLockGuard<'a> {
    lock: &'a CronLock,
}

impl Drop for CronLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

/// How one queue fared in a pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum QueueStatus {
    Drained(DrainSummary),
    Suspended { reason: String, processed: u64 },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueReport {
    pub queue: String,
    pub status: QueueStatus,
}

/// Result of [`QueueThrottleCron::run`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CronReport {
    pub run_id: Uuid,
    /// False when another pass held the lock
    pub ran: bool,
    pub queues: Vec<QueueReport>,
}

impl CronReport {
    /// Queues that failed outright (suspensions excluded)
    pub fn failures(&self) -> impl Iterator<Item = &QueueReport> {
        self.queues
            .iter()
            .filter(|report| matches!(report.status, QueueStatus::Failed { .. }))
    }

    pub fn total_processed(&self) -> u64 {
        self.queues
            .iter()
            .map(|report| match &report.status {
                QueueStatus::Drained(summary) => summary.processed,
                QueueStatus::Suspended { processed, .. } => *processed,
                QueueStatus::Failed { .. } => 0,
            })
            .sum()
    }
}

/// Drains all enabled queues once per call
#[derive(Debug)]
pub struct QueueThrottleCron {
    config: Arc<Config>,
    drainer: ThrottledDrainer,
    lock: CronLock,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl QueueThrottleCron {
    pub fn new(config: Arc<Config>, drainer: ThrottledDrainer) -> Self {
        Self {
            config,
            drainer,
            lock: CronLock::default(),
            last_run: Mutex::new(None),
        }
    }

    /// Completion time of the last pass that ran
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        self.last_run.lock().ok().and_then(|last| *last)
    }

    /// Run one pass over every enabled queue
    pub async fn run(&self) -> CronReport {
        let run_id = Uuid::new_v4();

        let Some(_guard) = self.lock.try_acquire() else {
            warn!("Attempting to re-run queue throttle cron while it is already running.");
            metrics::CRON_RUNS_TOTAL.with_label_values(&["skipped"]).inc();
            return CronReport {
                run_id,
                ran: false,
                queues: Vec::new(),
            };
        };

        let span = tracing::info_span!("queue_throttle_cron", %run_id);
        let queues = self.process_queues().instrument(span).await;

        let completed = Utc::now();
        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(completed);
        }
        metrics::CRON_RUNS_TOTAL.with_label_values(&["completed"]).inc();
        info!(%run_id, "Queue throttle cron run completed.");

        CronReport {
            run_id,
            ran: true,
            queues,
        }
    }

    async fn process_queues(&self) -> Vec<QueueReport> {
        let mut reports = Vec::new();

        for name in self.drainer.registry().names() {
            let settings = self.config.queue(&name);
            if !settings.enabled {
                continue;
            }

            let status = match self.process_queue(&name, &settings).await {
                Ok(summary) => QueueStatus::Drained(summary),
                Err(ThrottleError::QueueSuspended {
                    reason, processed, ..
                }) => QueueStatus::Suspended { reason, processed },
                Err(e) => {
                    error!(queue = %name, "Queue throttle cron failed for queue: {}", e);
                    QueueStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            reports.push(QueueReport {
                queue: name,
                status,
            });
        }

        reports
    }

    async fn process_queue(
        &self,
        name: &str,
        settings: &crate::config::QueueSettings,
    ) -> crate::error::Result<DrainSummary> {
        let entry = self.drainer.registry().get(name)?;
        entry.queue.create_queue().await?;

        let rate = settings.rate()?;
        let time_budget = match settings.time {
            0 => self.config.cron.default_time_secs,
            secs => secs,
        };
        let lease = (settings.time > 0).then(|| Duration::from_secs(settings.time));

        let ctx = ExecutionContext::with_time_budget_secs(time_budget)
            .lease(lease)
            .detailed_logging(settings.detailed_logging);

        self.drainer
            .drain_queue(name, entry.queue.as_ref(), entry.worker.as_ref(), &rate, &ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::queue::{MemoryQueue, Queue, QueueRegistry};
    use crate::worker::{FnWorker, WorkerOutcome};
    use serde_json::json;

    fn settings(enabled: bool, items: i64, unit: &str) -> QueueSettings {
        QueueSettings {
            enabled,
            time: 1,
            items,
            unit: unit.to_string(),
            ..Default::default()
        }
    }

    async fn filled(name: &str, count: u64) -> Arc<MemoryQueue> {
        let queue = Arc::new(MemoryQueue::new(name));
        for n in 0..count {
            queue.create_item(json!({ "n": n })).await.unwrap();
        }
        queue
    }

    struct Fixture {
        cron: QueueThrottleCron,
        queues: Vec<Arc<MemoryQueue>>,
    }

    /// Three queues: `alpha` (enabled), `beta` (enabled, suspends), `gamma` (disabled)
    async fn fixture() -> Fixture {
        let alpha = filled("alpha", 3).await;
        let beta = filled("beta", 3).await;
        let gamma = filled("gamma", 3).await;

        let mut registry = QueueRegistry::new();
        registry.register(
            "alpha",
            alpha.clone(),
            Arc::new(FnWorker::new(|_| WorkerOutcome::Processed)),
        );
        registry.register(
            "beta",
            beta.clone(),
            Arc::new(FnWorker::new(|_| {
                WorkerOutcome::Suspend("backend offline".to_string())
            })),
        );
        registry.register(
            "gamma",
            gamma.clone(),
            Arc::new(FnWorker::new(|_| WorkerOutcome::Processed)),
        );

        let mut config = Config::default();
        config.queues.insert("alpha".to_string(), settings(true, 100, "second"));
        config.queues.insert("beta".to_string(), settings(true, 100, "second"));
        config.queues.insert("gamma".to_string(), settings(false, 100, "second"));

        let drainer = ThrottledDrainer::new(Arc::new(registry));
        Fixture {
            cron: QueueThrottleCron::new(Arc::new(config), drainer),
            queues: vec![alpha, beta, gamma],
        }
    }

    #[tokio::test]
    async fn test_run_drains_enabled_queues_only() {
        let Fixture { cron, queues } = fixture().await;
        assert!(cron.last_run().is_none());

        let report = cron.run().await;
        assert!(report.ran);
        assert_eq!(report.queues.len(), 2);
        assert_eq!(report.queues[0].queue, "alpha");
        assert!(matches!(
            &report.queues[0].status,
            QueueStatus::Drained(summary) if summary.processed == 3
        ));

        assert!(queues[0].is_empty().await);
        assert_eq!(queues[2].len().await, 3);
        assert!(cron.last_run().is_some());
    }

    #[tokio::test]
    async fn test_suspension_moves_on_to_next_queue() {
        let Fixture { cron, queues } = fixture().await;

        let report = cron.run().await;
        let beta = &report.queues[1];
        assert_eq!(beta.queue, "beta");
        assert_eq!(
            beta.status,
            QueueStatus::Suspended {
                reason: "backend offline".to_string(),
                processed: 0,
            }
        );
        assert_eq!(report.failures().count(), 0);
        assert_eq!(report.total_processed(), 3);
        // the suspended item was released, not lost
        assert_eq!(queues[1].len().await, 3);
        assert!(queues[1].claim_item(None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_overlapping_run_is_skipped() {
        let Fixture { cron, queues } = fixture().await;

        let guard = cron.lock.try_acquire().unwrap();
        let report = cron.run().await;
        assert!(!report.ran);
        assert!(report.queues.is_empty());
        assert_eq!(queues[0].len().await, 3);
        assert!(cron.last_run().is_none());

        drop(guard);
        assert!(cron.run().await.ran);
    }

    #[tokio::test]
    async fn test_invalid_rate_reported_and_pass_continues() {
        let alpha = filled("alpha", 1).await;
        let zulu = filled("zulu", 2).await;
        let mut registry = QueueRegistry::new();
        registry.register("alpha", alpha.clone(), Arc::new(FnWorker::new(|_| WorkerOutcome::Processed)));
        registry.register("zulu", zulu.clone(), Arc::new(FnWorker::new(|_| WorkerOutcome::Processed)));

        let mut config = Config::default();
        config.queues.insert("alpha".to_string(), settings(true, 5, "fortnight"));
        config.queues.insert("zulu".to_string(), settings(true, 5, "second"));

        let cron = QueueThrottleCron::new(
            Arc::new(config),
            ThrottledDrainer::new(Arc::new(registry)),
        );
        let report = cron.run().await;

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].queue, "alpha");
        assert_eq!(alpha.len().await, 1);
        assert!(zulu.is_empty().await);
    }

    #[test]
    fn test_lock_guard_releases_on_drop() {
        let lock = CronLock::default();
        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }
}
