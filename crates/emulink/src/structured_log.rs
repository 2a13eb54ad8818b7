//! Structured JSONL logging for loader events.
//!
//! Every record carries the required fields `timestamp`, `trace_id`, `level`
//! and `event`; loader context (`op`, `backend`, `path`, `symbol`, `outcome`,
//! `details`) is optional. Records go to a process-wide [`LogEmitter`]
//! (stderr by default) and are filtered by `EMULINK_LOG`.

use std::io::Write;
use std::sync::Arc;

use emulink_core::config::{self, LogThreshold};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Returns `true` if records at this level pass `threshold`.
    #[must_use]
    pub fn passes(self, threshold: LogThreshold) -> bool {
        let as_threshold = match self {
            Self::Trace => LogThreshold::Trace,
            Self::Debug => LogThreshold::Debug,
            Self::Info => LogThreshold::Info,
            Self::Warn => LogThreshold::Warn,
            Self::Error => LogThreshold::Error,
            Self::Fatal => LogThreshold::Fatal,
        };
        as_threshold >= threshold
    }
}

/// Result of the operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    /// An argument check failed before any loader was called.
    Rejected,
    Failed,
    Fatal,
}

/// Canonical structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    ///
    /// An empty `trace_id` is filled in by the emitter.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            op: None,
            backend: None,
            path: None,
            symbol: None,
            outcome: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// In-memory sink shared between an emitter and its reader.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Complete lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Parsed entries written so far; lines that fail to parse are skipped.
    #[must_use]
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Writes structured JSONL log entries to stderr or a buffer.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    seq: u64,
    run_id: String,
    threshold: LogThreshold,
}

impl LogEmitter {
    /// Emitter on stderr, filtered by the configured `EMULINK_LOG` threshold.
    #[must_use]
    pub fn to_stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
            seq: 0,
            run_id: format!("emulink-{}", std::process::id()),
            threshold: config::log_threshold(),
        }
    }

    /// Emitter writing into a [`SharedBuffer`] (for testing).
    #[must_use]
    pub fn to_buffer(run_id: &str, threshold: LogThreshold) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let emitter = Self {
            writer: Box::new(buffer.clone()),
            seq: 0,
            run_id: run_id.to_string(),
            threshold,
        };
        (emitter, buffer)
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level.passes(self.threshold)
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:06}", self.run_id, self.seq)
    }

    /// Emit a fully-populated log entry, if it passes the threshold.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if !self.enabled(entry.level) {
            return Ok(());
        }
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

static GLOBAL_EMITTER: Mutex<Option<LogEmitter>> = Mutex::new(None);

/// Replace the process-wide emitter, returning the previous one.
pub fn install(emitter: LogEmitter) -> Option<LogEmitter> {
    GLOBAL_EMITTER.lock().replace(emitter)
}

/// Drop any installed emitter; the next record recreates the stderr emitter.
pub fn reset() -> Option<LogEmitter> {
    GLOBAL_EMITTER.lock().take()
}

/// Emit through the process-wide emitter. Write failures are dropped.
pub fn emit(entry: LogEntry) {
    let mut slot = GLOBAL_EMITTER.lock();
    let emitter = slot.get_or_insert_with(LogEmitter::to_stderr);
    let _ = emitter.emit_entry(entry);
}

/// Flush the process-wide emitter.
pub fn flush() {
    if let Some(emitter) = GLOBAL_EMITTER.lock().as_mut() {
        let _ = emitter.flush();
    }
}

/// Shorthand for an entry whose trace id is assigned at emission.
#[must_use]
pub fn event(level: LogLevel, event: &str) -> LogEntry {
    LogEntry::new(String::new(), level, event)
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn format_utc(secs: u64, millis: u32) -> String {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

// Days since 1970-01-01 to proleptic Gregorian (year, month, day).
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("emulink-1::000001", LogLevel::Info, "library_opened");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "emulink-1::000001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "library_opened");
        assert!(parsed.get("symbol").is_none());
        assert!(parsed.get("details").is_none());
    }

    #[test]
    fn log_entry_serializes_context() {
        let entry = LogEntry::new("t", LogLevel::Warn, "symbol_missing")
            .with_op("symbol")
            .with_backend("native")
            .with_symbol("nope")
            .with_outcome(Outcome::Failed)
            .with_details(serde_json::json!({"message": "undefined symbol"}));
        let parsed: serde_json::Value = serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert_eq!(parsed["op"], "symbol");
        assert_eq!(parsed["backend"], "native");
        assert_eq!(parsed["symbol"], "nope");
        assert_eq!(parsed["outcome"], "failed");
        assert_eq!(parsed["details"]["message"], "undefined symbol");
    }

    #[test]
    fn emitter_assigns_sequential_trace_ids() {
        let (mut emitter, buffer) = LogEmitter::to_buffer("run", LogThreshold::Trace);
        emitter.emit_entry(event(LogLevel::Debug, "a")).unwrap();
        emitter.emit_entry(event(LogLevel::Error, "b")).unwrap();
        let entries = buffer.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].trace_id, "run::000001");
        assert_eq!(entries[1].trace_id, "run::000002");
        assert_eq!(entries[1].event, "b");
    }

    #[test]
    fn emitter_filters_below_threshold() {
        let (mut emitter, buffer) = LogEmitter::to_buffer("run", LogThreshold::Warn);
        emitter.emit_entry(event(LogLevel::Info, "quiet")).unwrap();
        emitter.emit_entry(event(LogLevel::Fatal, "loud")).unwrap();
        let entries = buffer.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "loud");

        let (mut off, buffer) = LogEmitter::to_buffer("run", LogThreshold::Off);
        off.emit_entry(event(LogLevel::Fatal, "dropped")).unwrap();
        assert!(buffer.lines().is_empty());
    }

    #[test]
    fn utc_formatting_matches_known_instants() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        assert_eq!(format_utc(951_782_400, 5), "2000-02-29T00:00:00.005Z");
        assert_eq!(format_utc(1_700_000_000, 123), "2023-11-14T22:13:20.123Z");
    }
}
