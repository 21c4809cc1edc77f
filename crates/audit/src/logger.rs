//! JSONL audit log with size-based rotation.
//!
//! The live file is `<path>`; rotated backups are `<path>.1` (newest) through
//! `<path>.<backup_count>` (oldest). Writes never fail the caller: problems go
//! to `tracing` and the event is dropped.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use harvest_core::config::AuditConfig;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::AuditError;
use crate::event::{AuditEvent, EventKind, Severity};
use crate::redact::redact;

/// Filters for [`AuditLogger::get_recent_events`]. Empty fields match all.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub kind: Option<EventKind>,
    pub source: Option<String>,
    pub tool: Option<String>,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &AuditEvent) -> bool {
        self.kind.map_or(true, |k| event.kind == k)
            && self
                .source
                .as_deref()
                .map_or(true, |s| event.source.eq_ignore_ascii_case(s))
            && self
                .tool
                .as_deref()
                .map_or(true, |t| event.tool.as_deref() == Some(t))
    }
}

/// Aggregates over a time window of the log.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AuditStats {
    pub window_secs: u64,
    pub total_events: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub by_tool: BTreeMap<String, usize>,
    pub error_count: usize,
    pub error_rate: f64,
    /// Mean duration of operation events that recorded one.
    pub avg_duration_ms: Option<f64>,
}

impl AuditStats {
    pub fn from_events(events: &[AuditEvent], window: Duration) -> Self {
        let mut stats = AuditStats {
            window_secs: window.as_secs(),
            total_events: events.len(),
            ..Default::default()
        };
        let mut durations = Vec::new();
        for event in events {
            *stats.by_kind.entry(event.kind.as_str().to_string()).or_default() += 1;
            *stats.by_source.entry(event.source.clone()).or_default() += 1;
            if let Some(tool) = &event.tool {
                *stats.by_tool.entry(tool.clone()).or_default() += 1;
            }
            if event.is_error() {
                stats.error_count += 1;
            }
            if matches!(event.kind, EventKind::OperationSuccess | EventKind::OperationFailure) {
                durations.extend(event.duration_ms());
            }
        }
        if stats.total_events > 0 {
            stats.error_rate = stats.error_count as f64 / stats.total_events as f64;
        }
        if !durations.is_empty() {
            stats.avg_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }
}

struct LiveFile {
    file: File,
    size: u64,
}

pub struct AuditLogger {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
    live: Mutex<Option<LiveFile>>,
}

impl AuditLogger {
    /// The live file is opened lazily on first write.
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            path: config.log_path.clone(),
            max_bytes: config.max_bytes.max(1),
            backup_count: config.backup_count,
            live: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event after redacting its arguments.
    pub fn log_event(&self, mut event: AuditEvent) {
        event.arguments = redact(std::mem::take(&mut event.arguments));
        let mut line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "audit event not serializable, dropped");
                return;
            }
        };
        line.push('\n');

        let mut live = self.live();
        if let Err(e) = self.append(&mut live, line.as_bytes()) {
            // Reopen on the next write.
            *live = None;
            warn!(path = %self.path.display(), kind = %event.kind, error = %e, "audit write failed");
        }
    }

    fn append(&self, live: &mut Option<LiveFile>, line: &[u8]) -> io::Result<()> {
        if live.is_none() {
            *live = Some(self.open_live()?);
        }
        let needs_rotation = live
            .as_ref()
            .is_some_and(|f| f.size > 0 && f.size + line.len() as u64 > self.max_bytes);
        if needs_rotation {
            *live = None;
            self.rotate()?;
            *live = Some(self.open_live()?);
        }
        if let Some(f) = live.as_mut() {
            f.file.write_all(line)?;
            f.file.flush()?;
            f.size += line.len() as u64;
        }
        Ok(())
    }

    fn open_live(&self) -> io::Result<LiveFile> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let size = file.metadata()?.len();
        Ok(LiveFile { file, size })
    }

    /// Shift `.n` to `.n+1`, dropping anything past the retention count, then
    /// move the live file to `.1`.
    fn rotate(&self) -> io::Result<()> {
        if self.backup_count == 0 {
            fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "audit log truncated (no backups kept)");
            return Ok(());
        }
        let oldest = self.backup_path(self.backup_count);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.backup_count).rev() {
            let from = self.backup_path(n);
            if from.exists() {
                fs::rename(&from, self.backup_path(n + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;
        info!(path = %self.path.display(), backups = self.backup_count, "audit log rotated");
        Ok(())
    }

    pub fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    /// Existing log files, oldest backup first and the live file last.
    pub fn log_files(&self) -> Vec<PathBuf> {
        (1..=self.backup_count)
            .rev()
            .map(|n| self.backup_path(n))
            .chain(std::iter::once(self.path.clone()))
            .filter(|p| p.exists())
            .collect()
    }

    /// Every parseable event at or after `since`, in file order.
    fn scan(&self, since: DateTime<Utc>) -> Result<Vec<AuditEvent>, AuditError> {
        // Holding the writer lock keeps a rotation from moving files mid-scan.
        let _live = self.live();
        let mut events = Vec::new();
        for path in self.log_files() {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditEvent>(&line) {
                    Ok(event) if event.timestamp >= since => events.push(event),
                    Ok(_) => {}
                    Err(e) => {
                        debug!(path = %path.display(), line = lineno + 1, error = %e, "skipping malformed audit line")
                    }
                }
            }
        }
        Ok(events)
    }

    /// Events from the last `window` matching `filter`, newest first.
    pub fn get_recent_events(
        &self,
        window: Duration,
        filter: &EventFilter,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let mut events: Vec<_> = self
            .scan(window_start(window))?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    pub fn get_stats(&self, window: Duration) -> Result<AuditStats, AuditError> {
        let events = self.scan(window_start(window))?;
        Ok(AuditStats::from_events(&events, window))
    }

    // ── Convenience wrappers ─────────────────────────────────────

    pub fn log_operation_success(
        &self,
        source: &str,
        tool: &str,
        arguments: Value,
        result: Option<Value>,
        duration: Duration,
    ) {
        let mut event = AuditEvent::new(EventKind::OperationSuccess, source)
            .with_tool(tool)
            .with_arguments(arguments)
            .with_duration(duration);
        event.result = result;
        self.log_event(event);
    }

    pub fn log_operation_failure(
        &self,
        source: &str,
        tool: &str,
        arguments: Value,
        error: &str,
        duration: Duration,
    ) {
        self.log_event(
            AuditEvent::new(EventKind::OperationFailure, source)
                .with_tool(tool)
                .with_arguments(arguments)
                .with_error(error)
                .with_duration(duration),
        );
    }

    pub fn log_admission_granted(&self, source: &str, tokens: u32) {
        self.log_event(AuditEvent::new(EventKind::AdmissionGranted, source).with_metadata("tokens", tokens));
    }

    pub fn log_admission_denied(&self, source: &str, reason: &str) {
        self.log_event(
            AuditEvent::new(EventKind::AdmissionDenied, source)
                .with_metadata("reason", reason)
                .with_severity(Severity::Medium),
        );
    }

    pub fn log_auth_failure(&self, source: &str, detail: &str) {
        self.log_event(
            AuditEvent::new(EventKind::AuthFailure, source)
                .with_error(detail)
                .with_severity(Severity::High),
        );
    }

    pub fn log_security_event(&self, source: &str, description: &str, severity: Severity) {
        self.log_event(
            AuditEvent::new(EventKind::SecurityEvent, source)
                .with_metadata("description", description)
                .with_severity(severity),
        );
    }

    fn live(&self) -> MutexGuard<'_, Option<LiveFile>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn window_start(window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| Utc::now().checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logger(dir: &tempfile::TempDir, max_bytes: u64, backups: usize) -> AuditLogger {
        AuditLogger::new(&AuditConfig {
            log_path: dir.path().join("audit.log"),
            max_bytes,
            backup_count: backups,
        })
    }

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn arguments_are_redacted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir, 1 << 20, 3);
        log.log_operation_success(
            "indeed",
            "search",
            json!({"q": "rust", "api_token": "s3cr3t"}),
            None,
            Duration::from_millis(12),
        );
        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(!raw.contains("s3cr3t"));
        assert!(raw.contains(crate::REDACTED));
    }

    #[test]
    fn recent_events_are_newest_first_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir, 1 << 20, 3);
        let now = Utc::now();
        for (i, source) in ["indeed", "lever", "indeed"].iter().enumerate() {
            log.log_event(
                AuditEvent::new(EventKind::RecordAccepted, *source)
                    .with_timestamp(now - chrono::Duration::seconds(10 - i as i64)),
            );
        }
        log.log_admission_denied("indeed", "bucket full");

        let all = log.get_recent_events(HOUR, &EventFilter::default()).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].kind, EventKind::AdmissionDenied);

        let filter = EventFilter {
            kind: Some(EventKind::RecordAccepted),
            source: Some("indeed".into()),
            limit: Some(1),
            ..Default::default()
        };
        let picked = log.get_recent_events(HOUR, &filter).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].timestamp, now - chrono::Duration::seconds(8));
    }

    #[test]
    fn window_excludes_old_events() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir, 1 << 20, 3);
        log.log_event(
            AuditEvent::new(EventKind::RecordAccepted, "indeed")
                .with_timestamp(Utc::now() - chrono::Duration::hours(2)),
        );
        log.log_event(AuditEvent::new(EventKind::RecordAccepted, "indeed"));
        assert_eq!(log.get_recent_events(HOUR, &EventFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir, 1 << 20, 3);
        log.log_event(AuditEvent::new(EventKind::RecordAccepted, "indeed"));
        {
            let mut f = OpenOptions::new().append(true).open(log.path()).unwrap();
            writeln!(f, "{{not json").unwrap();
            writeln!(f).unwrap();
        }
        log.log_event(AuditEvent::new(EventKind::RecordDuplicate, "indeed"));
        let stats = log.get_stats(HOUR).unwrap();
        assert_eq!(stats.total_events, 2);
    }

    #[test]
    fn stats_aggregate_by_kind_source_and_tool() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir, 1 << 20, 3);
        log.log_operation_success("indeed", "search", json!({}), Some(json!(3)), Duration::from_millis(100));
        log.log_operation_failure("indeed", "search", json!({}), "timeout", Duration::from_millis(300));
        log.log_admission_granted("lever", 1);
        log.log_admission_denied("lever", "bucket full");

        let stats = log.get_stats(HOUR).unwrap();
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.by_source["indeed"], 2);
        assert_eq!(stats.by_tool["search"], 2);
        assert_eq!(stats.by_kind["admission_denied"], 1);
        assert_eq!(stats.error_count, 2);
        assert!((stats.error_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.avg_duration_ms, Some(200.0));
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir, 1 << 20, 3);
        assert!(log.get_recent_events(HOUR, &EventFilter::default()).unwrap().is_empty());
        assert_eq!(log.get_stats(HOUR).unwrap().total_events, 0);
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let log = AuditLogger::new(&AuditConfig {
            log_path: blocker.join("audit.log"),
            max_bytes: 1024,
            backup_count: 1,
        });
        log.log_auth_failure("indeed", "bad credentials");
        log.log_auth_failure("indeed", "bad credentials");
    }
}
