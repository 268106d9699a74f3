//! Log capture for the daemon's `/logs` route.
//!
//! A [`LogCollector`] is a `tracing` layer that keeps the most recent events
//! in a bounded ring buffer; a [`LogReader`] reads them back.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// A single captured log entry.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Seconds since the collector was created.
    pub elapsed_secs: f64,
    pub level: Level,
    pub target: String,
    /// The message followed by any structured fields as `key=value`.
    pub message: String,
}

impl CapturedEvent {
    /// Render for the IPC log listing.
    pub fn to_entry(&self) -> crate::ipc::LogEntry {
        crate::ipc::LogEntry {
            timestamp: format!("+{:.3}s", self.elapsed_secs),
            level: self.level.to_string(),
            target: self.target.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug)]
struct LogBuffer {
    entries: VecDeque<CapturedEvent>,
    capacity: usize,
    start_time: Instant,
}

impl LogBuffer {
    fn push(&mut self, level: Level, target: String, message: String) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(CapturedEvent {
            elapsed_secs: self.start_time.elapsed().as_secs_f64(),
            level,
            target,
            message,
        });
    }
}

/// A `tracing` layer that captures events into a shared ring buffer.
#[derive(Debug, Clone)]
pub struct LogCollector {
    buffer: Arc<Mutex<LogBuffer>>,
}

impl LogCollector {
    /// Create a collector keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(LogBuffer {
                entries: VecDeque::with_capacity(capacity),
                capacity,
                start_time: Instant::now(),
            })),
        }
    }

    pub fn reader(&self) -> LogReader {
        LogReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(*metadata.level(), metadata.target().to_string(), visitor.finish());
    }
}

/// A read handle for the log buffer.
#[derive(Debug, Clone)]
pub struct LogReader {
    buffer: Arc<Mutex<LogBuffer>>,
}

impl LogReader {
    /// Snapshot of all captured entries, oldest first.
    pub fn entries(&self) -> Vec<CapturedEvent> {
        self.lock().entries.iter().cloned().collect()
    }

    /// The newest `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<CapturedEvent> {
        let buffer = self.lock();
        let skip = buffer.entries.len().saturating_sub(limit);
        buffer.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: String,
}

impl FieldVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: std::fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }
}

/// Install the global subscriber for a long-running process: an env filter
/// defaulting to `default_level`, a fmt layer on stderr, and a collector.
///
/// Returns `None` if a global subscriber is already set.
pub fn install(default_level: &str, capacity: usize) -> Option<LogReader> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let collector = LogCollector::new(capacity);
    let reader = collector.reader();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(collector)
        .try_init()
        .ok()
        .map(|()| reader)
}
