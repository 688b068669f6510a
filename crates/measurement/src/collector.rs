//! Shared operation counters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct OpCounters {
    count: u64,
    errors: u64,
    total: Duration,
    min: Duration,
    max: Duration,
}

impl OpCounters {
    fn new() -> Self {
        Self {
            count: 0,
            errors: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
        }
    }

    fn record(&mut self, latency: Duration, failed: bool) {
        self.count += 1;
        if failed {
            self.errors += 1;
        }
        self.total += latency;
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);
    }
}

/// Aggregate counters for every operation recorded since creation.
///
/// Cloning is not supported; share it behind an `Arc`.
#[derive(Debug)]
pub struct Measurement {
    start_time: Instant,
    ops: Mutex<BTreeMap<String, OpCounters>>,
}

/// Point-in-time view of one operation's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSummary {
    pub operation: String,
    pub count: u64,
    pub errors: u64,
    pub ops_per_sec: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Point-in-time view of all counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    pub timestamp: String,
    pub elapsed_secs: f64,
    pub operations: Vec<OpSummary>,
}

impl MeasurementSnapshot {
    /// Total number of recorded operations across all names.
    pub fn total_count(&self) -> u64 {
        self.operations.iter().map(|op| op.count).sum()
    }

    /// Total number of failed operations across all names.
    pub fn total_errors(&self) -> u64 {
        self.operations.iter().map(|op| op.errors).sum()
    }
}

impl Default for Measurement {
    fn default() -> Self {
        Self::new()
    }
}

impl Measurement {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            ops: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record one finished operation.
    pub fn measure(&self, operation: &str, latency: Duration, failed: bool) {
        let mut ops = self.lock();
        match ops.get_mut(operation) {
            Some(counters) => counters.record(latency, failed),
            None => {
                let mut counters = OpCounters::new();
                counters.record(latency, failed);
                ops.insert(operation.to_string(), counters);
            }
        }
    }

    /// Take a snapshot of every operation recorded so far.
    pub fn snapshot(&self) -> MeasurementSnapshot {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let operations = self
            .lock()
            .iter()
            .map(|(name, c)| summarize(name, c, elapsed))
            .collect();

        MeasurementSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            elapsed_secs: elapsed,
            operations,
        }
    }

    // Counters stay consistent even if a recording thread panicked.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, OpCounters>> {
        self.ops.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn summarize(name: &str, c: &OpCounters, elapsed: f64) -> OpSummary {
    let ops_per_sec = if elapsed > 0.0 {
        c.count as f64 / elapsed
    } else {
        0.0
    };
    let avg_ms = if c.count > 0 {
        c.total.as_secs_f64() * 1000.0 / c.count as f64
    } else {
        0.0
    };
    let min_ms = if c.count > 0 {
        c.min.as_secs_f64() * 1000.0
    } else {
        0.0
    };

    OpSummary {
        operation: name.to_string(),
        count: c.count,
        errors: c.errors,
        ops_per_sec,
        avg_ms,
        min_ms,
        max_ms: c.max.as_secs_f64() * 1000.0,
    }
}
