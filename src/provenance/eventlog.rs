//! SF-010: Append-only JSONL run event log.
//!
//! Every record is serialized, written, and flushed before `emit` returns,
//! so an aborted run leaves a complete prefix on disk. Warnings and errors
//! are always mirrored to `tracing`; action events only when console
//! mirroring is on.

use crate::core::types::{RunEvent, TimestampedEvent};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Destination for run events.
pub trait EventSink: Send {
    /// Record one event. Fails only when the record cannot be persisted.
    fn emit(&mut self, event: RunEvent) -> Result<(), String>;

    /// Flush buffered output.
    fn flush(&mut self) -> Result<(), String>;
}

/// JSONL event log with an in-memory copy of every record.
pub struct EventLog {
    writer: Option<(PathBuf, BufWriter<File>)>,
    records: Vec<TimestampedEvent>,
    console: bool,
}

impl EventLog {
    /// Log that keeps records in memory only.
    pub fn memory(console: bool) -> Self {
        Self {
            writer: None,
            records: Vec::new(),
            console,
        }
    }

    /// Log that appends to `path`, creating parent directories.
    pub fn open(path: &Path, console: bool) -> Result<Self, String> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create log dir {}: {}", parent.display(), e))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;
        Ok(Self {
            writer: Some((path.to_path_buf(), BufWriter::new(file))),
            records: Vec::new(),
            console,
        })
    }

    /// File backing this log, if any.
    pub fn path(&self) -> Option<&Path> {
        self.writer.as_ref().map(|(p, _)| p.as_path())
    }

    pub fn records(&self) -> &[TimestampedEvent] {
        &self.records
    }

    /// Event kinds in emission order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.records.iter().map(|r| r.event.kind()).collect()
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: RunEvent) -> Result<(), String> {
        mirror(&event, self.console);
        let record = TimestampedEvent {
            timestamp: now_iso8601(),
            event,
        };
        if let Some((path, writer)) = self.writer.as_mut() {
            let json =
                serde_json::to_string(&record).map_err(|e| format!("JSON serialize error: {}", e))?;
            writeln!(writer, "{}", json)
                .and_then(|_| writer.flush())
                .map_err(|e| format!("write error {}: {}", path.display(), e))?;
        }
        self.records.push(record);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), String> {
        match self.writer.as_mut() {
            Some((path, writer)) => writer
                .flush()
                .map_err(|e| format!("flush error {}: {}", path.display(), e)),
            None => Ok(()),
        }
    }
}

fn mirror(event: &RunEvent, console: bool) {
    match event {
        RunEvent::Warning {
            step,
            message,
            line,
        } => tracing::warn!(step = %step, line = ?line, "{}", message),
        RunEvent::Error {
            step,
            message,
            line,
        } => tracing::error!(step = %step, line = ?line, "{}", message),
        other if console => tracing::info!(
            kind = other.kind(),
            step = other.step().unwrap_or("-"),
            action = other.action().unwrap_or("-"),
            "[{}] {} :: {}",
            other.kind(),
            other.step().unwrap_or("-"),
            other.action().unwrap_or("-")
        ),
        _ => {}
    }
}

/// Default log location for a dry run: `<cwd>/logs/<workflow>-dryrun-<millis>.jsonl`.
pub fn dry_run_log_path(cwd: &Path, workflow: &str) -> PathBuf {
    cwd.join("logs")
        .join(format!("{}-dryrun-{}.jsonl", workflow, epoch_millis()))
}

fn epoch_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// ISO 8601 UTC timestamp with millisecond precision.
pub fn now_iso8601() -> String {
    format_iso8601(epoch_millis())
}

fn format_iso8601(millis: u128) -> String {
    let secs = (millis / 1000) as u64;
    let ms = millis % 1000;
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let (y, m, d) = civil_date(days as i64);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        y,
        m,
        d,
        time_secs / 3600,
        (time_secs % 3600) / 60,
        time_secs % 60,
        ms
    )
}

/// Days since the epoch to (year, month, day), proleptic Gregorian.
fn civil_date(days: i64) -> (i64, usize, i64) {
    let mut y = 1970i64;
    let mut remaining = days;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let feb = if is_leap(y) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut m = 12;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md {
            m = i + 1;
            break;
        }
        remaining -= md;
    }
    (y, m, remaining + 1)
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Generate a run id from the clock.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("run-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RunMode, Status};

    fn warning(step: &str) -> RunEvent {
        RunEvent::Warning {
            step: step.to_string(),
            message: "careful".to_string(),
            line: Some(3),
        }
    }

    #[test]
    fn test_sf010_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2026-01-01T00:00:00.000Z".len());
    }

    #[test]
    fn test_sf010_format_known_instants() {
        assert_eq!(format_iso8601(0), "1970-01-01T00:00:00.000Z");
        // 2024-02-29T12:34:56.789Z
        assert_eq!(format_iso8601(1_709_210_096_789), "2024-02-29T12:34:56.789Z");
        // 2023-12-31T23:59:59.999Z
        assert_eq!(format_iso8601(1_704_067_199_999), "2023-12-31T23:59:59.999Z");
    }

    #[test]
    fn test_sf010_is_leap() {
        assert!(is_leap(2000));
        assert!(!is_leap(1900));
        assert!(is_leap(2024));
        assert!(!is_leap(2026));
    }

    #[test]
    fn test_sf010_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("run-"));
        assert_eq!(id.len(), 4 + 12);
    }

    #[test]
    fn test_sf010_dry_run_log_path() {
        let p = dry_run_log_path(Path::new("/work"), "new-app");
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        assert!(p.starts_with("/work/logs"));
        assert!(name.starts_with("new-app-dryrun-"));
        assert!(name.ends_with(".jsonl"));
    }

    #[test]
    fn test_sf010_memory_log_records() {
        let mut log = EventLog::memory(false);
        log.emit(warning("s1")).unwrap();
        log.emit(RunEvent::Note {
            step: "s1".into(),
            action: "a".into(),
            message: "hi".into(),
        })
        .unwrap();
        assert_eq!(log.kinds(), vec!["warning", "note"]);
        assert!(log.path().is_none());
        assert!(log.records()[0].timestamp.ends_with('Z'));
    }

    #[test]
    fn test_sf010_file_log_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/run.jsonl");
        let mut log = EventLog::open(&path, false).unwrap();
        log.emit(RunEvent::RunStarted {
            run_id: "run-abc".into(),
            workflow: "wf".into(),
            mode: RunMode::DryRun,
            fingerprint: "blake3:00".into(),
        })
        .unwrap();
        log.emit(warning("s1")).unwrap();
        log.emit(RunEvent::RunCompleted {
            run_id: "run-abc".into(),
            status: Status::Ok,
            actions_ok: 0,
            duration_ms: 1,
        })
        .unwrap();

        // Readable before close: each record is flushed on emit.
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(v["timestamp"].is_string());
        }
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "run-started");
        assert_eq!(first["runId"], "run-abc");
        assert_eq!(first["mode"], "dry-run");
        let second: TimestampedEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.event, warning("s1"));
    }

    #[test]
    fn test_sf010_file_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        for _ in 0..2 {
            let mut log = EventLog::open(&path, false).unwrap();
            log.emit(warning("s")).unwrap();
            log.flush().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn test_sf010_open_fails_on_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = EventLog::open(dir.path(), false).err().unwrap();
        assert!(err.contains("cannot open event log"));
    }
}
