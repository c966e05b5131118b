//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the coordinator never blocks on bookkeeping.
//! Monotonic counters and the latency histogram are cumulative (Prometheus
//! expects that); the interval average and max are reset by `report()`.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Handle latency bucket boundaries (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Load all bucket values without resetting
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.load(Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector for the message pipeline
pub struct Metrics {
    /// Text messages handed to the coordinator (monotonic)
    messages_received: AtomicU64,
    /// Rows appended to the ledger (monotonic)
    rows_recorded: AtomicU64,
    /// Redeliveries skipped by the delivery log (monotonic)
    duplicates_skipped: AtomicU64,
    /// Messages rejected before classification (monotonic)
    empty_messages: AtomicU64,
    /// Classifier call failures (monotonic)
    classifier_failures: AtomicU64,
    /// Classifier answers that needed the local fallback parser (monotonic)
    fallback_parses: AtomicU64,
    /// Ledger append failures (monotonic)
    ledger_failures: AtomicU64,
    /// Acknowledgment reactions that failed after a successful append (monotonic)
    ack_failures: AtomicU64,
    /// Commands answered (monotonic)
    commands_handled: AtomicU64,
    /// Long-poll errors (monotonic)
    poll_errors: AtomicU64,
    /// Handle latency histogram buckets (cumulative)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of all handle latencies in ms (cumulative)
    latency_sum_ms: AtomicU64,
    /// Handles since last report (reset on report)
    handled_since_report: AtomicU64,
    /// Sum of latencies since last report (reset on report)
    interval_latency_sum_ms: AtomicU64,
    /// Max latency since last report (reset on report)
    interval_latency_max_ms: AtomicU64,
    started_at: Instant,
    /// Last report time (only accessed from reporter)
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            rows_recorded: AtomicU64::new(0),
            duplicates_skipped: AtomicU64::new(0),
            empty_messages: AtomicU64::new(0),
            classifier_failures: AtomicU64::new(0),
            fallback_parses: AtomicU64::new(0),
            ledger_failures: AtomicU64::new(0),
            ack_failures: AtomicU64::new(0),
            commands_handled: AtomicU64::new(0),
            poll_errors: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_ms: AtomicU64::new(0),
            handled_since_report: AtomicU64::new(0),
            interval_latency_sum_ms: AtomicU64::new(0),
            interval_latency_max_ms: AtomicU64::new(0),
            started_at: Instant::now(),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_recorded(&self) {
        self.rows_recorded.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_empty(&self) {
        self.empty_messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_classifier_failure(&self) {
        self.classifier_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fallback_parse(&self) {
        self.fallback_parses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ledger_failure(&self) {
        self.ledger_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command(&self) {
        self.commands_handled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one `handle` call took, whatever its outcome
    #[inline]
    pub fn record_handle_latency(&self, latency_ms: u64) {
        self.latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.handled_since_report.fetch_add(1, Ordering::Relaxed);
        self.interval_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.interval_latency_max_ms, latency_ms);
    }

    pub fn rows_recorded(&self) -> u64 {
        self.rows_recorded.load(Ordering::Relaxed)
    }

    /// Failures of either upstream, i.e. messages the user should resend
    pub fn failed_total(&self) -> u64 {
        self.classifier_failures.load(Ordering::Relaxed) + self.ledger_failures.load(Ordering::Relaxed)
    }

    /// Point-in-time view of every cumulative counter, without resetting anything
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            rows_recorded: self.rows_recorded.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            empty_messages: self.empty_messages.load(Ordering::Relaxed),
            classifier_failures: self.classifier_failures.load(Ordering::Relaxed),
            fallback_parses: self.fallback_parses.load(Ordering::Relaxed),
            ledger_failures: self.ledger_failures.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            commands_handled: self.commands_handled.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            latency_buckets: load_buckets(&self.latency_buckets),
            latency_sum_ms: self.latency_sum_ms.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    /// Generate a summary for the periodic log line and reset interval stats
    pub fn report(&self) -> MetricsSummary {
        let handled = self.handled_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.interval_latency_sum_ms.swap(0, Ordering::Relaxed);
        let max_latency_ms = self.interval_latency_max_ms.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let snapshot = self.snapshot();
        MetricsSummary {
            interval_secs: elapsed.as_secs(),
            handled,
            avg_latency_ms: if handled > 0 { latency_sum / handled } else { 0 },
            max_latency_ms,
            p50_ms: percentile_from_buckets(&snapshot.latency_buckets, 0.50),
            p99_ms: percentile_from_buckets(&snapshot.latency_buckets, 0.99),
            snapshot,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub rows_recorded: u64,
    pub duplicates_skipped: u64,
    pub empty_messages: u64,
    pub classifier_failures: u64,
    pub fallback_parses: u64,
    pub ledger_failures: u64,
    pub ack_failures: u64,
    pub commands_handled: u64,
    pub poll_errors: u64,
    /// Handle latency histogram buckets (ms, cumulative)
    pub latency_buckets: [u64; NUM_BUCKETS],
    pub latency_sum_ms: u64,
    pub uptime_secs: u64,
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub interval_secs: u64,
    /// Messages handled in this interval
    pub handled: u64,
    pub avg_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Cumulative percentiles (bucket upper bounds)
    pub p50_ms: u64,
    pub p99_ms: u64,
    pub snapshot: MetricsSnapshot,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            handled = %self.handled,
            interval_secs = %self.interval_secs,
            avg_latency_ms = %self.avg_latency_ms,
            max_latency_ms = %self.max_latency_ms,
            p50_ms = %self.p50_ms,
            p99_ms = %self.p99_ms,
            received_total = %self.snapshot.messages_received,
            recorded_total = %self.snapshot.rows_recorded,
            duplicates_total = %self.snapshot.duplicates_skipped,
            classifier_failures = %self.snapshot.classifier_failures,
            ledger_failures = %self.snapshot.ledger_failures,
            ack_failures = %self.snapshot.ack_failures,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 0);
        assert_eq!(snapshot.rows_recorded, 0);
        assert_eq!(snapshot.latency_buckets.iter().sum::<u64>(), 0);
    }

    #[test]
    fn test_counters() {
        let metrics = Metrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_recorded();
        metrics.record_classifier_failure();
        metrics.record_ledger_failure();
        metrics.record_duplicate();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.rows_recorded, 1);
        assert_eq!(snapshot.duplicates_skipped, 1);
        assert_eq!(metrics.rows_recorded(), 1);
        assert_eq!(metrics.failed_total(), 2);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(51), 1);
        assert_eq!(bucket_index(25600), 9);
        assert_eq!(bucket_index(100_000), 10);
    }

    #[test]
    fn test_report_resets_interval_only() {
        let metrics = Metrics::new();
        metrics.record_handle_latency(100);
        metrics.record_handle_latency(200);
        metrics.record_handle_latency(300);

        let summary = metrics.report();
        assert_eq!(summary.handled, 3);
        assert_eq!(summary.avg_latency_ms, 200);
        assert_eq!(summary.max_latency_ms, 300);
        assert_eq!(summary.snapshot.latency_sum_ms, 600);

        let second = metrics.report();
        assert_eq!(second.handled, 0);
        assert_eq!(second.avg_latency_ms, 0);
        assert_eq!(second.max_latency_ms, 0);
        // Histogram stays cumulative for Prometheus
        assert_eq!(second.snapshot.latency_buckets.iter().sum::<u64>(), 3);
    }

    #[test]
    fn test_percentiles() {
        let mut buckets = [0u64; NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 0);

        buckets[1] = 90; // ≤100ms
        buckets[6] = 10; // ≤3200ms
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 100);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 3200);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        m.record_received();
                        m.record_handle_latency(i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_received, 1000);
        assert_eq!(snapshot.latency_buckets.iter().sum::<u64>(), 1000);
    }
}
