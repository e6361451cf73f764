//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤1000, ≤2000, ≤4000, ... ≤512000, >512000
const BUCKET_BOUNDS: [u64; 10] =
    [1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000, 512_000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
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

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] = [
        1_000, 2_000, 4_000, 8_000, 16_000, 32_000, 64_000, 128_000, 256_000, 512_000, 1_024_000,
    ];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Frames read from the source (monotonic)
    frames_total: AtomicU64,
    /// Frames that ran the full pipeline (monotonic)
    frames_processed: AtomicU64,
    /// Frames processed since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Frame processing latency sum / max / buckets (reset on report)
    latency_sum_us: AtomicU64,
    latency_max_us: AtomicU64,
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Cumulative frame latency histogram for scraping (never reset)
    latency_total_buckets: [AtomicU64; NUM_BUCKETS],
    latency_total_sum_us: AtomicU64,
    /// Detector regions handed to OCR (monotonic)
    regions_total: AtomicU64,
    /// Degenerate crops skipped (monotonic)
    empty_regions_total: AtomicU64,
    /// Reads the correction engine rejected (monotonic)
    unread_total: AtomicU64,
    /// Plates suppressed by cooldown (monotonic)
    cooldown_total: AtomicU64,
    /// Whole-ROI fallback OCR passes / accepted plates (monotonic)
    fallback_attempts: AtomicU64,
    fallback_matches: AtomicU64,
    /// Emitted events by decision (monotonic)
    events_allowed: AtomicU64,
    events_blocked: AtomicU64,
    /// Detector / recognizer / sink failures (monotonic)
    collaborator_errors: AtomicU64,
    /// Gate commands sent by the worker (monotonic)
    gate_commands_sent: AtomicU64,
    /// Gate commands dropped due to channel full (monotonic)
    gate_cmds_dropped: AtomicU64,
    /// Gate command queue delay histogram (time from enqueue to worker pickup)
    gate_queue_delay_buckets: [AtomicU64; NUM_BUCKETS],
    gate_queue_delay_max_us: AtomicU64,
    /// Plates currently held by the cooldown tracker (gauge)
    cooldown_entries: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_processed: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_total_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_total_sum_us: AtomicU64::new(0),
            regions_total: AtomicU64::new(0),
            empty_regions_total: AtomicU64::new(0),
            unread_total: AtomicU64::new(0),
            cooldown_total: AtomicU64::new(0),
            fallback_attempts: AtomicU64::new(0),
            fallback_matches: AtomicU64::new(0),
            events_allowed: AtomicU64::new(0),
            events_blocked: AtomicU64::new(0),
            collaborator_errors: AtomicU64::new(0),
            gate_commands_sent: AtomicU64::new(0),
            gate_cmds_dropped: AtomicU64::new(0),
            gate_queue_delay_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            gate_queue_delay_max_us: AtomicU64::new(0),
            cooldown_entries: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_frame_seen(&self) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fully processed frame with its latency
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_total_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.latency_total_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_region(&self) {
        self.regions_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_empty_region(&self) {
        self.empty_regions_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unread(&self) {
        self.unread_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cooldown(&self) {
        self.cooldown_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fallback(&self, matched: bool) {
        self.fallback_attempts.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.fallback_matches.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_event(&self, allowed: bool) {
        if allowed {
            self.events_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_blocked.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_collaborator_error(&self) {
        self.collaborator_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_command(&self) {
        self.gate_commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_gate_cmd_dropped(&self) {
        self.gate_cmds_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record gate command queue delay (time from enqueue to worker pickup)
    #[inline]
    pub fn record_gate_queue_delay(&self, delay_us: u64) {
        self.gate_queue_delay_buckets[bucket_index(delay_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.gate_queue_delay_max_us, delay_us);
    }

    #[inline]
    pub fn set_cooldown_entries(&self, entries: u64) {
        self.cooldown_entries.store(entries, Ordering::Relaxed);
    }

    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn unread_total(&self) -> u64 {
        self.unread_total.load(Ordering::Relaxed)
    }

    pub fn cooldown_total(&self) -> u64 {
        self.cooldown_total.load(Ordering::Relaxed)
    }

    pub fn events_total(&self) -> u64 {
        self.events_allowed.load(Ordering::Relaxed) + self.events_blocked.load(Ordering::Relaxed)
    }

    pub fn collaborator_errors(&self) -> u64 {
        self.collaborator_errors.load(Ordering::Relaxed)
    }

    pub fn gate_cmds_dropped(&self) -> u64 {
        self.gate_cmds_dropped.load(Ordering::Relaxed)
    }

    /// Monotonic counters for scraping. Does not reset anything.
    pub fn counters(&self) -> MetricsCounters {
        let mut latency_buckets = [0u64; NUM_BUCKETS];
        for (i, bucket) in self.latency_total_buckets.iter().enumerate() {
            latency_buckets[i] = bucket.load(Ordering::Relaxed);
        }
        MetricsCounters {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            regions_total: self.regions_total.load(Ordering::Relaxed),
            empty_regions_total: self.empty_regions_total.load(Ordering::Relaxed),
            unread_total: self.unread_total.load(Ordering::Relaxed),
            cooldown_total: self.cooldown_total.load(Ordering::Relaxed),
            fallback_attempts: self.fallback_attempts.load(Ordering::Relaxed),
            fallback_matches: self.fallback_matches.load(Ordering::Relaxed),
            events_allowed: self.events_allowed.load(Ordering::Relaxed),
            events_blocked: self.events_blocked.load(Ordering::Relaxed),
            collaborator_errors: self.collaborator_errors.load(Ordering::Relaxed),
            gate_commands_sent: self.gate_commands_sent.load(Ordering::Relaxed),
            gate_cmds_dropped: self.gate_cmds_dropped.load(Ordering::Relaxed),
            cooldown_entries: self.cooldown_entries.load(Ordering::Relaxed),
            latency_buckets,
            latency_sum_us: self.latency_total_sum_us.load(Ordering::Relaxed),
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let frames_count = self.frames_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let gate_queue_delay_buckets = swap_buckets(&self.gate_queue_delay_buckets);
        let gate_queue_delay_max_us = self.gate_queue_delay_max_us.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        let frames_total = self.frames_total.load(Ordering::Relaxed);
        let frames_processed = self.frames_processed.load(Ordering::Relaxed);

        MetricsSummary {
            frames_total,
            frames_processed,
            frames_skipped: frames_total.saturating_sub(frames_processed),
            frames_per_sec,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            lat_buckets,
            regions_total: self.regions_total.load(Ordering::Relaxed),
            empty_regions_total: self.empty_regions_total.load(Ordering::Relaxed),
            unread_total: self.unread_total.load(Ordering::Relaxed),
            cooldown_total: self.cooldown_total.load(Ordering::Relaxed),
            fallback_attempts: self.fallback_attempts.load(Ordering::Relaxed),
            fallback_matches: self.fallback_matches.load(Ordering::Relaxed),
            events_allowed: self.events_allowed.load(Ordering::Relaxed),
            events_blocked: self.events_blocked.load(Ordering::Relaxed),
            collaborator_errors: self.collaborator_errors.load(Ordering::Relaxed),
            gate_commands_sent: self.gate_commands_sent.load(Ordering::Relaxed),
            gate_cmds_dropped: self.gate_cmds_dropped.load(Ordering::Relaxed),
            gate_queue_delay_p99_us: percentile_from_buckets(&gate_queue_delay_buckets, 0.99),
            gate_queue_delay_max_us,
            cooldown_entries: self.cooldown_entries.load(Ordering::Relaxed),
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

/// Point-in-time view of the monotonic counters
#[derive(Debug, Clone)]
pub struct MetricsCounters {
    pub frames_total: u64,
    pub frames_processed: u64,
    pub regions_total: u64,
    pub empty_regions_total: u64,
    pub unread_total: u64,
    pub cooldown_total: u64,
    pub fallback_attempts: u64,
    pub fallback_matches: u64,
    pub events_allowed: u64,
    pub events_blocked: u64,
    pub collaborator_errors: u64,
    pub gate_commands_sent: u64,
    pub gate_cmds_dropped: u64,
    pub cooldown_entries: u64,
    /// Cumulative frame latency histogram
    pub latency_buckets: [u64; NUM_BUCKETS],
    pub latency_sum_us: u64,
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    /// Frame latency histogram buckets
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p99_us: u64,
    pub regions_total: u64,
    pub empty_regions_total: u64,
    pub unread_total: u64,
    pub cooldown_total: u64,
    pub fallback_attempts: u64,
    pub fallback_matches: u64,
    pub events_allowed: u64,
    pub events_blocked: u64,
    pub collaborator_errors: u64,
    pub gate_commands_sent: u64,
    pub gate_cmds_dropped: u64,
    pub gate_queue_delay_p99_us: u64,
    pub gate_queue_delay_max_us: u64,
    pub cooldown_entries: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_processed = %self.frames_processed,
            frames_skipped = %self.frames_skipped,
            fps = %format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            lat_p99_us = %self.lat_p99_us,
            regions = %self.regions_total,
            unread = %self.unread_total,
            cooldown = %self.cooldown_total,
            fallback = %self.fallback_attempts,
            allowed = %self.events_allowed,
            blocked = %self.events_blocked,
            collaborator_errors = %self.collaborator_errors,
            gate_dropped = %self.gate_cmds_dropped,
            cooldown_entries = %self.cooldown_entries,
            "metrics"
        );
    }
}
