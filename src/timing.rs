//! Scoped duration measurement.
//!
//! Every measured operation produces exactly one [`TimingRecord`], whether the
//! operation succeeded or failed. Records go to a [`TimingSink`]; the default
//! [`LogSink`] writes them as `time,<label>,<ms>` lines on the
//! `docbench::timing` tracing target. Records are never aggregated.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Tracing target used for timing lines, so they can be filtered independently.
pub const TIMING_TARGET: &str = "docbench::timing";

/// One measured operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingRecord {
    pub label: String,
    pub duration_millis: u64,
}

impl TimingRecord {
    pub fn new(label: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            label: label.into(),
            duration_millis: elapsed.as_millis() as u64,
        }
    }

    /// The `time,<label>,<ms>` log line.
    pub fn line(&self) -> String {
        format!("time,{},{}", self.label, self.duration_millis)
    }
}

/// Destination for timing records.
pub trait TimingSink: Send + Sync {
    fn record(&self, record: TimingRecord);
}

/// Writes each record as one info-level log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TimingSink for LogSink {
    fn record(&self, record: TimingRecord) {
        tracing::info!(target: TIMING_TARGET, "{}", record.line());
    }
}

/// Keeps records in memory together with the instant they were emitted.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<(Instant, TimingRecord)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Instant, TimingRecord)> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .map(|(_, record)| record.label)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TimingSink for CollectingSink {
    fn record(&self, record: TimingRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push((Instant::now(), record));
        }
    }
}

/// Cheaply cloneable handle that components use to time their operations.
#[derive(Clone)]
pub struct Timer {
    sink: Arc<dyn TimingSink>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new(Arc::new(LogSink))
    }
}

impl Timer {
    pub fn new(sink: Arc<dyn TimingSink>) -> Self {
        Self { sink }
    }

    /// Await `operation`, emit one record for it, and hand back its output untouched.
    pub async fn measure<F, T>(&self, label: impl Into<String>, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let label = label.into();
        let start = Instant::now();
        let output = operation.await;
        self.sink.record(TimingRecord::new(label, start.elapsed()));
        output
    }

    /// Synchronous counterpart of [`Timer::measure`].
    pub fn measure_sync<F, T>(&self, label: impl Into<String>, operation: F) -> T
    where
        F: FnOnce() -> T,
    {
        let label = label.into();
        let start = Instant::now();
        let output = operation();
        self.sink.record(TimingRecord::new(label, start.elapsed()));
        output
    }

    /// Start a guard that records when dropped, for spans that cover several awaits.
    pub fn start(&self, label: impl Into<String>) -> TimingGuard {
        TimingGuard {
            label: Some(label.into()),
            start: Instant::now(),
            sink: self.sink.clone(),
        }
    }
}

/// Records its elapsed time on drop.
pub struct TimingGuard {
    label: Option<String>,
    start: Instant,
    sink: Arc<dyn TimingSink>,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        if let Some(label) = self.label.take() {
            self.sink
                .record(TimingRecord::new(label, self.start.elapsed()));
        }
    }
}
