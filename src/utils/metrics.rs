use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::services::encoder::EncodeTier;

/// Latency percentiles cover the most recent files only
const LATENCY_WINDOW: usize = 4096;

/// Process-wide conversion metrics.
///
/// Tracks requests, per-file outcomes, encoder fallbacks and latency.
/// Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Request Metrics
    requests_total: AtomicUsize,
    requests_failed: AtomicUsize,
    endpoint_counters: DashMap<String, AtomicUsize>,

    // File Metrics
    files_converted: AtomicUsize,
    files_failed: AtomicUsize,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    format_counters: DashMap<String, AtomicUsize>,
    failure_kinds: DashMap<String, AtomicUsize>,

    // Encoder fallback tiers (index 0 = with metadata)
    tier_counters: [AtomicUsize; 3],

    file_latency_ms: RwLock<VecDeque<u64>>,
    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                requests_total: AtomicUsize::new(0),
                requests_failed: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                files_converted: AtomicUsize::new(0),
                files_failed: AtomicUsize::new(0),
                bytes_in: AtomicU64::new(0),
                bytes_out: AtomicU64::new(0),
                format_counters: DashMap::new(),
                failure_kinds: DashMap::new(),
                tier_counters: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
                file_latency_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                start_time: Instant::now(),
            }),
        }
    }

    // Request Metrics
    pub fn record_request(&self, success: bool) {
        self.inner.requests_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // File Metrics
    pub fn record_file_converted(&self, format: &str, bytes_in: usize, bytes_out: usize, duration: Duration) {
        self.inner.files_converted.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_in.fetch_add(bytes_in as u64, Ordering::Relaxed);
        self.inner.bytes_out.fetch_add(bytes_out as u64, Ordering::Relaxed);
        self.inner
            .format_counters
            .entry(format.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
        let mut latency = self.inner.file_latency_ms.write();
        if latency.len() == LATENCY_WINDOW {
            latency.pop_front();
        }
        latency.push_back(duration.as_millis() as u64);
    }

    pub fn record_file_failed(&self, kind: &str) {
        self.inner.files_failed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .failure_kinds
            .entry(kind.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count which tier finally produced an encoded file
    pub fn record_encode_tier(&self, tier: EncodeTier) {
        self.inner.tier_counters[tier.index()].fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let latency: Vec<u64> = self.inner.file_latency_ms.read().iter().copied().collect();
        let file_latency_avg_ms = avg(&latency);
        let file_latency_p50_ms = percentile(&latency, 0.5);
        let file_latency_p95_ms = percentile(&latency, 0.95);
        let file_latency_p99_ms = percentile(&latency, 0.99);

        let conversions_by_format = collect_counters(&self.inner.format_counters);
        let failures_by_kind = collect_counters(&self.inner.failure_kinds);
        let requests_by_endpoint = collect_counters(&self.inner.endpoint_counters);

        MetricsSnapshot {
            requests_total: self.inner.requests_total.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            requests_by_endpoint,
            files_converted: self.inner.files_converted.load(Ordering::Relaxed),
            files_failed: self.inner.files_failed.load(Ordering::Relaxed),
            bytes_in: self.inner.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.inner.bytes_out.load(Ordering::Relaxed),
            conversions_by_format,
            failures_by_kind,
            encodes_with_metadata: self.inner.tier_counters[0].load(Ordering::Relaxed),
            encodes_without_metadata: self.inner.tier_counters[1].load(Ordering::Relaxed),
            encodes_minimal: self.inner.tier_counters[2].load(Ordering::Relaxed),
            file_latency_avg_ms,
            file_latency_p50_ms,
            file_latency_p95_ms,
            file_latency_p99_ms,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP convert_requests_total Total number of conversion requests
# TYPE convert_requests_total counter
convert_requests_total {{}} {}

# HELP convert_requests_failed_total Requests where every file failed
# TYPE convert_requests_failed_total counter
convert_requests_failed_total {{}} {}

# HELP files_converted_total Files converted successfully
# TYPE files_converted_total counter
files_converted_total {{}} {}

# HELP files_failed_total Files that failed conversion
# TYPE files_failed_total counter
files_failed_total {{}} {}

# HELP bytes_in_total Upload bytes of converted files
# TYPE bytes_in_total counter
bytes_in_total {{}} {}

# HELP bytes_out_total Encoded output bytes
# TYPE bytes_out_total counter
bytes_out_total {{}} {}

# HELP encode_tier_total Encodes completed per fallback tier
# TYPE encode_tier_total counter
encode_tier_total {{tier="with_metadata"}} {}
encode_tier_total {{tier="without_metadata"}} {}
encode_tier_total {{tier="minimal"}} {}

# HELP file_latency_avg_ms Average per-file processing time in milliseconds
# TYPE file_latency_avg_ms gauge
file_latency_avg_ms {{}} {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {{}} {}
"#,
            snapshot.requests_total,
            snapshot.requests_failed,
            snapshot.files_converted,
            snapshot.files_failed,
            snapshot.bytes_in,
            snapshot.bytes_out,
            snapshot.encodes_with_metadata,
            snapshot.encodes_without_metadata,
            snapshot.encodes_minimal,
            snapshot.file_latency_avg_ms,
            snapshot.uptime_seconds,
        );

        if !snapshot.conversions_by_format.is_empty() {
            out.push_str("\n# HELP conversions_total Files converted per output format\n");
            out.push_str("# TYPE conversions_total counter\n");
            for (format, count) in &snapshot.conversions_by_format {
                out.push_str(&format!("conversions_total {{format=\"{}\"}} {}\n", format, count));
            }
        }

        if !snapshot.failures_by_kind.is_empty() {
            out.push_str("\n# HELP file_failures_total Failed files per error kind\n");
            out.push_str("# TYPE file_failures_total counter\n");
            for (kind, count) in &snapshot.failures_by_kind {
                out.push_str(&format!("file_failures_total {{kind=\"{}\"}} {}\n", kind, count));
            }
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: usize,
    pub requests_failed: usize,
    pub requests_by_endpoint: BTreeMap<String, usize>,
    pub files_converted: usize,
    pub files_failed: usize,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub conversions_by_format: BTreeMap<String, usize>,
    pub failures_by_kind: BTreeMap<String, usize>,
    pub encodes_with_metadata: usize,
    pub encodes_without_metadata: usize,
    pub encodes_minimal: usize,
    pub file_latency_avg_ms: u64,
    pub file_latency_p50_ms: u64,
    pub file_latency_p95_ms: u64,
    pub file_latency_p99_ms: u64,
    pub uptime_seconds: u64,
}

fn collect_counters(map: &DashMap<String, AtomicUsize>) -> BTreeMap<String, usize> {
    map.iter()
        .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
        .collect()
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
