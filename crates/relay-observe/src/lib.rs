//! Log manager (C10) and ambient operations metrics.
//!
//! Combines a bounded in-memory ring (backing the `get_logs`/`get_log_stats`
//! endpoint commands) with a size-rotating file sink, both fed from the same
//! `tracing` events the rest of the fabric emits. Counter/gauge shape is
//! carried over from the teacher's operations metrics, renamed to the
//! command-dispatch counters this fabric actually has.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

// ─── Log ring ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::TRACE => LogLevel::Trace,
            Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warn,
            Level::ERROR => LogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub target: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStats {
    pub capacity: usize,
    pub len: usize,
    pub by_level: HashMap<LogLevel, u64>,
}

/// Bounded ring of the most recent log records, queryable by the
/// `get_logs`/`get_log_stats` endpoint commands.
pub struct LogRing {
    records: RwLock<VecDeque<LogRecord>>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, record: LogRecord) {
        let mut records = self.records.write();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent records first, optionally filtered to a minimum level.
    pub fn get(&self, min_level: Option<LogLevel>, limit: usize) -> Vec<LogRecord> {
        let records = self.records.read();
        records
            .iter()
            .rev()
            .filter(|r| min_level.is_none_or(|min| r.level >= min))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> LogStats {
        let records = self.records.read();
        let mut by_level = HashMap::new();
        for r in records.iter() {
            *by_level.entry(r.level).or_insert(0u64) += 1;
        }
        LogStats {
            capacity: self.capacity,
            len: records.len(),
            by_level,
        }
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// A `tracing_subscriber` layer that mirrors every event into a [`LogRing`].
pub struct RingLayer {
    ring: std::sync::Arc<LogRing>,
}

impl RingLayer {
    pub fn new(ring: std::sync::Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.ring.push(LogRecord {
            level: LogLevel::from(*event.metadata().level()),
            target: event.metadata().target().to_string(),
            message: visitor.0,
            timestamp: Utc::now(),
        });
    }
}

// ─── Size-rotating file sink ──────────────────────────────────────────────

struct RotatingInner {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

/// A log file sink that rotates to `path.1`, `path.2`, ... once `path`
/// exceeds `max_bytes`, keeping at most `backups` rotated files.
pub struct SizeRotatingWriter {
    inner: Mutex<RotatingInner>,
}

impl SizeRotatingWriter {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Mutex::new(RotatingInner {
                path,
                max_bytes,
                backups,
                file,
                written,
            }),
        })
    }

    fn rotated_path(base: &Path, index: usize) -> PathBuf {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }

    fn rotate(inner: &mut RotatingInner) -> io::Result<()> {
        for i in (1..inner.backups).rev() {
            let from = Self::rotated_path(&inner.path, i);
            let to = Self::rotated_path(&inner.path, i + 1);
            if from.exists() {
                std::fs::rename(&from, &to)?;
            }
        }
        let first_backup = Self::rotated_path(&inner.path, 1);
        std::fs::rename(&inner.path, &first_backup)?;
        inner.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&inner.path)?;
        inner.written = 0;
        Ok(())
    }

    pub fn backup_count(&self) -> usize {
        let inner = self.inner.lock();
        (1..=inner.backups)
            .filter(|i| Self::rotated_path(&inner.path, *i).exists())
            .count()
    }
}

impl Write for &SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock();
        if inner.backups > 0 && inner.written > 0 && inner.written + buf.len() as u64 > inner.max_bytes {
            SizeRotatingWriter::rotate(&mut inner)?;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SizeRotatingWriter {
    type Writer = &'a SizeRotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

// ─── Operations metrics ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic counters for command dispatch, shared via `Arc` across the
/// scheduler, worker pool, and admin `get_stats` handler.
#[derive(Debug, Default)]
pub struct OperationsMetrics {
    pub commands_total: Counter,
    pub commands_succeeded: Counter,
    pub commands_failed: Counter,
    pub commands_in_flight: Gauge,
    latency_ema_ms_bits: AtomicU64,
}

impl OperationsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dispatch(&self) {
        self.commands_total.inc();
        self.commands_in_flight.inc();
    }

    /// Record completion, folding `latency_ms` into an EMA (alpha=0.3).
    pub fn record_completion(&self, success: bool, latency_ms: f64) {
        self.commands_in_flight.dec();
        if success {
            self.commands_succeeded.inc();
        } else {
            self.commands_failed.inc();
        }

        loop {
            let current_bits = self.latency_ema_ms_bits.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let updated = if current == 0.0 {
                latency_ms
            } else {
                0.3 * latency_ms + 0.7 * current
            };
            if self
                .latency_ema_ms_bits
                .compare_exchange(
                    current_bits,
                    updated.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn latency_ema_ms(&self) -> f64 {
        f64::from_bits(self.latency_ema_ms_bits.load(Ordering::Relaxed))
    }
}

/// Renders [`OperationsMetrics`] as Prometheus text format.
pub struct MetricsExporter<'a> {
    metrics: &'a OperationsMetrics,
    prefix: String,
}

impl<'a> MetricsExporter<'a> {
    pub fn new(metrics: &'a OperationsMetrics) -> Self {
        Self {
            metrics,
            prefix: "relayfabric".to_string(),
        }
    }

    pub fn with_prefix(metrics: &'a OperationsMetrics, prefix: impl Into<String>) -> Self {
        Self {
            metrics,
            prefix: prefix.into(),
        }
    }

    pub fn render(&self) -> String {
        let m = self.metrics;
        let p = &self.prefix;
        let mut out = String::new();
        self.write_counter(&mut out, p, "commands_total", "Total commands dispatched", m.commands_total.get());
        self.write_counter(&mut out, p, "commands_succeeded", "Total commands completed successfully", m.commands_succeeded.get());
        self.write_counter(&mut out, p, "commands_failed", "Total commands completed with an error", m.commands_failed.get());
        self.write_gauge(&mut out, p, "commands_in_flight", "Commands currently dispatched", m.commands_in_flight.get());
        out.push_str(&format!("# HELP {p}_latency_ema_ms Exponential moving average of command latency in milliseconds\n"));
        out.push_str(&format!("# TYPE {p}_latency_ema_ms gauge\n"));
        out.push_str(&format!("{p}_latency_ema_ms {}\n\n", m.latency_ema_ms()));
        out
    }

    fn write_counter(&self, out: &mut String, prefix: &str, name: &str, help: &str, value: u64) {
        out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
        out.push_str(&format!("# TYPE {prefix}_{name} counter\n"));
        out.push_str(&format!("{prefix}_{name} {value}\n\n"));
    }

    fn write_gauge(&self, out: &mut String, prefix: &str, name: &str, help: &str, value: i64) {
        out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
        out.push_str(&format!("# TYPE {prefix}_{name} gauge\n"));
        out.push_str(&format!("{prefix}_{name} {value}\n\n"));
    }
}
