//! Query and operation statistics.
//!
//! Both collectors keep bounded ring buffers of recent samples and compute
//! averages and extremes when read, never incrementally. Counters are
//! mirrored to the `metrics` facade so a host can export them.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Recent samples kept per operation or SQL signature.
pub const TIMING_SAMPLES: usize = 100;

/// Distinct SQL signatures tracked before new ones are dropped.
pub const DEFAULT_MAX_SIGNATURES: usize = 500;

const SIGNATURE_MAX_LEN: usize = 160;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Summary over the retained samples of one operation type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingSummary {
    /// Total operations ever recorded
    pub count: u64,
    /// Samples currently retained
    pub samples: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Default)]
struct Ring {
    total: u64,
    recent: VecDeque<Duration>,
}

impl Ring {
    fn push(&mut self, sample: Duration, capacity: usize) {
        self.total += 1;
        if self.recent.len() == capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(sample);
    }

    fn summary(&self) -> TimingSummary {
        if self.recent.is_empty() {
            return TimingSummary {
                count: self.total,
                ..TimingSummary::default()
            };
        }
        let ms: Vec<f64> = self
            .recent
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();
        let sum: f64 = ms.iter().sum();
        TimingSummary {
            count: self.total,
            samples: ms.len(),
            avg_ms: sum / ms.len() as f64,
            min_ms: ms.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: ms.iter().copied().fold(0.0, f64::max),
        }
    }
}

/// Per-operation timing ring buffers ("acquire", "hold", ...).
#[derive(Debug)]
pub struct OperationTimings {
    capacity: usize,
    ops: Mutex<HashMap<String, Ring>>,
}

impl OperationTimings {
    pub fn new() -> Self {
        Self::with_capacity(TIMING_SAMPLES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ops: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, operation: &str, elapsed: Duration) {
        let mut ops = lock(&self.ops);
        ops.entry(operation.to_string())
            .or_default()
            .push(elapsed, self.capacity);
    }

    pub fn summary(&self, operation: &str) -> Option<TimingSummary> {
        lock(&self.ops).get(operation).map(Ring::summary)
    }

    pub fn summaries(&self) -> BTreeMap<String, TimingSummary> {
        lock(&self.ops)
            .iter()
            .map(|(op, ring)| (op.clone(), ring.summary()))
            .collect()
    }

    pub fn reset(&self) {
        lock(&self.ops).clear();
    }
}

impl Default for OperationTimings {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregated statistics for one SQL signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryStat {
    pub signature: String,
    pub count: u64,
    pub failures: u64,
    pub total_time_ms: f64,
    /// Computed over the retained samples
    pub recent: TimingSummary,
}

#[derive(Debug, Default)]
struct QueryEntry {
    failures: u64,
    total: Duration,
    ring: Ring,
}

/// Statement statistics keyed by normalized SQL text.
#[derive(Debug)]
pub struct QueryStatistics {
    max_signatures: usize,
    entries: Mutex<HashMap<String, QueryEntry>>,
}

impl QueryStatistics {
    pub fn new() -> Self {
        Self::with_max_signatures(DEFAULT_MAX_SIGNATURES)
    }

    pub fn with_max_signatures(max_signatures: usize) -> Self {
        Self {
            max_signatures: max_signatures.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record one execution. Failures count toward both totals.
    pub fn record(&self, sql: &str, elapsed: Duration, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        metrics::counter!("sql_toolkit_queries_total", "outcome" => outcome).increment(1);
        metrics::histogram!("sql_toolkit_query_duration_ms")
            .record(elapsed.as_secs_f64() * 1000.0);

        let signature = normalize_signature(sql);
        let mut entries = lock(&self.entries);
        if !entries.contains_key(&signature) && entries.len() >= self.max_signatures {
            tracing::debug!(
                tracked = entries.len(),
                "Statistics signature limit reached, not tracking new statement"
            );
            return;
        }
        let entry = entries.entry(signature).or_default();
        entry.total += elapsed;
        if !success {
            entry.failures += 1;
        }
        entry.ring.push(elapsed, TIMING_SAMPLES);
    }

    pub fn snapshot(&self) -> Vec<QueryStat> {
        let entries = lock(&self.entries);
        let mut stats: Vec<QueryStat> = entries
            .iter()
            .map(|(sig, e)| QueryStat {
                signature: sig.clone(),
                count: e.ring.total,
                failures: e.failures,
                total_time_ms: e.total.as_secs_f64() * 1000.0,
                recent: e.ring.summary(),
            })
            .collect();
        stats.sort_by(|a, b| a.signature.cmp(&b.signature));
        stats
    }

    /// Signatures with the largest cumulative time.
    pub fn top(&self, n: usize) -> Vec<QueryStat> {
        let mut stats = self.snapshot();
        stats.sort_by(|a, b| b.total_time_ms.total_cmp(&a.total_time_ms));
        stats.truncate(n);
        stats
    }

    pub fn get(&self, sql: &str) -> Option<QueryStat> {
        let signature = normalize_signature(sql);
        self.snapshot()
            .into_iter()
            .find(|s| s.signature == signature)
    }

    /// Total executions and failures across all signatures.
    pub fn totals(&self) -> (u64, u64) {
        lock(&self.entries)
            .values()
            .fold((0, 0), |(n, f), e| (n + e.ring.total, f + e.failures))
    }

    pub fn reset(&self) {
        lock(&self.entries).clear();
    }
}

impl Default for QueryStatistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse whitespace and cap the length so equivalent statements share a key.
pub fn normalize_signature(sql: &str) -> String {
    let collapsed = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SIGNATURE_MAX_LEN {
        collapsed
    } else {
        let mut truncated: String = collapsed.chars().take(SIGNATURE_MAX_LEN).collect();
        truncated.push_str("...");
        truncated
    }
}
