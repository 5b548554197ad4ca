//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::CameraState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Verification latency bucket boundaries (milliseconds)
/// Buckets: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800
const BUCKET_BOUNDS: [u64; 10] = [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800];
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
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Camera state values for the Prometheus gauge
pub fn camera_state_value(state: CameraState) -> u64 {
    match state {
        CameraState::Idle => 0,
        CameraState::Checking => 1,
        CameraState::Ready => 2,
        CameraState::Error => 3,
    }
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Raw scan lines received from any source (monotonic)
    scans_received: AtomicU64,
    /// Scans received since last report (reset on report)
    scans_since_report: AtomicU64,
    /// Rejected because a verification was in flight (monotonic)
    scans_throttled_busy: AtomicU64,
    /// Rejected as a repeat inside the cooldown (monotonic)
    scans_throttled_duplicate: AtomicU64,
    /// Rejected by the payload normalizer (monotonic)
    scans_malformed: AtomicU64,
    /// Scan lines dropped because the orchestrator queue was full (monotonic)
    scans_dropped: AtomicU64,
    /// Verification calls completed (monotonic)
    verifications_total: AtomicU64,
    verifications_granted: AtomicU64,
    verifications_denied: AtomicU64,
    /// No usable answer (network error, timeout, unreadable body)
    verifications_failed: AtomicU64,
    /// Verification latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of verification latencies in ms (reset on report)
    latency_sum_ms: AtomicU64,
    /// Max verification latency in ms (reset on report)
    latency_max_ms: AtomicU64,
    /// Verifications since last report (reset on report)
    verifications_since_report: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Failed verifications that had a cached identity to display
    degraded_outcomes: AtomicU64,
    /// Current camera state (see `camera_state_value`)
    camera_state: AtomicU64,
    camera_activations: AtomicU64,
    camera_failures: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_received: AtomicU64::new(0),
            scans_since_report: AtomicU64::new(0),
            scans_throttled_busy: AtomicU64::new(0),
            scans_throttled_duplicate: AtomicU64::new(0),
            scans_malformed: AtomicU64::new(0),
            scans_dropped: AtomicU64::new(0),
            verifications_total: AtomicU64::new(0),
            verifications_granted: AtomicU64::new(0),
            verifications_denied: AtomicU64::new(0),
            verifications_failed: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_sum_ms: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
            verifications_since_report: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            degraded_outcomes: AtomicU64::new(0),
            camera_state: AtomicU64::new(camera_state_value(CameraState::Idle)),
            camera_activations: AtomicU64::new(0),
            camera_failures: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_scan_received(&self) {
        self.scans_received.fetch_add(1, Ordering::Relaxed);
        self.scans_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_throttled_busy(&self) {
        self.scans_throttled_busy.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_throttled_duplicate(&self) {
        self.scans_throttled_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.scans_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a scan line dropped due to channel full (lock-free)
    #[inline]
    pub fn record_scan_dropped(&self) {
        self.scans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed verification call (lock-free)
    ///
    /// `answered` is false when no application answer was obtained.
    #[inline]
    pub fn record_verification(&self, latency_ms: u64, answered: bool, granted: bool) {
        self.verifications_total.fetch_add(1, Ordering::Relaxed);
        self.verifications_since_report.fetch_add(1, Ordering::Relaxed);
        let counter = match (answered, granted) {
            (false, _) => &self.verifications_failed,
            (true, true) => &self.verifications_granted,
            (true, false) => &self.verifications_denied,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_ms, latency_ms);
    }

    #[inline]
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_degraded_outcome(&self) {
        self.degraded_outcomes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_camera_state(&self, state: CameraState) {
        self.camera_state.store(camera_state_value(state), Ordering::Relaxed);
    }

    #[inline]
    pub fn record_camera_activation(&self, ok: bool) {
        if ok {
            self.camera_activations.fetch_add(1, Ordering::Relaxed);
        } else {
            self.camera_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn scans_received(&self) -> u64 {
        self.scans_received.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn scans_dropped(&self) -> u64 {
        self.scans_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn verifications_total(&self) -> u64 {
        self.verifications_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let scans_count = self.scans_since_report.swap(0, Ordering::Relaxed);
        let verify_count = self.verifications_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_ms.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let scans_per_min = if elapsed.as_secs_f64() > 0.0 {
            scans_count as f64 * 60.0 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            scans_received: self.scans_received.load(Ordering::Relaxed),
            scans_per_min,
            scans_throttled_busy: self.scans_throttled_busy.load(Ordering::Relaxed),
            scans_throttled_duplicate: self.scans_throttled_duplicate.load(Ordering::Relaxed),
            scans_malformed: self.scans_malformed.load(Ordering::Relaxed),
            scans_dropped: self.scans_dropped.load(Ordering::Relaxed),
            verifications_total: self.verifications_total.load(Ordering::Relaxed),
            verifications_granted: self.verifications_granted.load(Ordering::Relaxed),
            verifications_denied: self.verifications_denied.load(Ordering::Relaxed),
            verifications_failed: self.verifications_failed.load(Ordering::Relaxed),
            lat_buckets,
            lat_avg_ms: if verify_count > 0 { latency_sum / verify_count } else { 0 },
            lat_max_ms: max_latency,
            lat_p50_ms: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_ms: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_ms: percentile_from_buckets(&lat_buckets, 0.99),
            lat_sum_ms: latency_sum,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            degraded_outcomes: self.degraded_outcomes.load(Ordering::Relaxed),
            camera_state: self.camera_state.load(Ordering::Relaxed),
            camera_activations: self.camera_activations.load(Ordering::Relaxed),
            camera_failures: self.camera_failures.load(Ordering::Relaxed),
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
pub struct MetricsSummary {
    pub scans_received: u64,
    pub scans_per_min: f64,
    pub scans_throttled_busy: u64,
    pub scans_throttled_duplicate: u64,
    pub scans_malformed: u64,
    pub scans_dropped: u64,
    pub verifications_total: u64,
    pub verifications_granted: u64,
    pub verifications_denied: u64,
    pub verifications_failed: u64,
    /// Verification latency histogram buckets since last report
    /// Bounds: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800 ms
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_avg_ms: u64,
    pub lat_max_ms: u64,
    pub lat_p50_ms: u64,
    pub lat_p95_ms: u64,
    pub lat_p99_ms: u64,
    pub lat_sum_ms: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub degraded_outcomes: u64,
    /// Current camera state (0=idle, 1=checking, 2=ready, 3=error)
    pub camera_state: u64,
    pub camera_activations: u64,
    pub camera_failures: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            scans_total = %self.scans_received,
            scans_per_min = format!("{:.1}", self.scans_per_min),
            throttled_busy = %self.scans_throttled_busy,
            throttled_dup = %self.scans_throttled_duplicate,
            malformed = %self.scans_malformed,
            dropped = %self.scans_dropped,
            granted = %self.verifications_granted,
            denied = %self.verifications_denied,
            failed = %self.verifications_failed,
            avg_latency_ms = %self.lat_avg_ms,
            p99_ms = %self.lat_p99_ms,
            camera_state = %self.camera_state,
            "metrics"
        );
    }
}
