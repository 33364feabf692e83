// Prometheus metrics for throttled queue draining
//
// - Items processed, throttled, requeued and failed per queue (counters)
// - Queue suspensions (counter)
// - Drain duration per queue and exit reason (histogram)
// - Scheduled pass results (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref ITEMS_PROCESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("queue_items_processed_total", "Items processed and deleted"),
        &["queue"]
    ).expect("Failed to create items processed metric");

    pub static ref ITEMS_THROTTLED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("queue_items_throttled_total", "Claims released because the window budget was spent"),
        &["queue"]
    ).expect("Failed to create items throttled metric");

    pub static ref ITEMS_REQUEUED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("queue_items_requeued_total", "Items released on worker request"),
        &["queue"]
    ).expect("Failed to create items requeued metric");

    pub static ref ITEMS_FAILED_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("queue_items_failed_total", "Items whose processing failed"),
        &["queue"]
    ).expect("Failed to create items failed metric");

    pub static ref QUEUE_SUSPENSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("queue_suspensions_total", "Drains stopped by a worker suspension"),
        &["queue"]
    ).expect("Failed to create queue suspensions metric");

    pub static ref DRAIN_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new("queue_drain_duration_seconds", "Wall time of a single drain call"),
        &["queue", "exit"]
    ).expect("Failed to create drain duration metric");

    pub static ref CRON_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("queue_cron_runs_total", "Scheduled passes by result"),
        &["result"]
    ).expect("Failed to create cron runs metric");
}

/// Register all metrics - call once per process
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(ITEMS_PROCESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ITEMS_THROTTLED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ITEMS_REQUEUED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ITEMS_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_SUSPENSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DRAIN_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(CRON_RUNS_TOTAL.clone()))?;
    Ok(())
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_queue_label() {
        // May already be registered by another test in this process
        let _ = init();

        ITEMS_PROCESSED_TOTAL.with_label_values(&["metrics-test"]).inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("queue_items_processed_total"));
        assert!(text.contains("queue=\"metrics-test\""));
    }

    #[test]
    fn test_counters_increment() {
        let before = ITEMS_THROTTLED_TOTAL.with_label_values(&["metrics-inc"]).get();
        ITEMS_THROTTLED_TOTAL.with_label_values(&["metrics-inc"]).inc_by(2);
        assert_eq!(
            ITEMS_THROTTLED_TOTAL.with_label_values(&["metrics-inc"]).get(),
            before + 2
        );
    }
}
