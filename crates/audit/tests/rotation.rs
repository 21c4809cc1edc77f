use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use harvest_audit::{AnomalyDetector, AnomalyKind, AuditEvent, AuditLogger, EventFilter, EventKind};
use harvest_core::config::AuditConfig;
use uuid::Uuid;

fn event_ids_in(path: &std::path::Path) -> Vec<Uuid> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<AuditEvent>(line).unwrap().event_id)
        .collect()
}

fn one_line_len() -> u64 {
    let line = serde_json::to_string(&AuditEvent::new(EventKind::RecordAccepted, "indeed")).unwrap();
    line.len() as u64 + 1
}

#[test]
fn crossing_threshold_once_yields_one_backup_and_no_lost_events() {
    let dir = tempfile::tempdir().unwrap();
    let line = one_line_len();
    let logger = AuditLogger::new(&AuditConfig {
        log_path: dir.path().join("audit.log"),
        // Room for five lines; the sixth forces exactly one rotation.
        max_bytes: line * 5 + line / 2,
        backup_count: 3,
    });

    let mut written = Vec::new();
    for _ in 0..8 {
        let event = AuditEvent::new(EventKind::RecordAccepted, "indeed");
        written.push(event.event_id);
        logger.log_event(event);
    }

    assert!(logger.backup_path(1).exists());
    assert!(!logger.backup_path(2).exists());

    let backup = event_ids_in(&logger.backup_path(1));
    let live = event_ids_in(logger.path());
    assert_eq!(backup.len(), 5);
    assert_eq!(live.len(), 3);

    let mut seen: Vec<Uuid> = backup.into_iter().chain(live).collect();
    assert_eq!(seen, written, "order preserved across rotation");
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), written.len());

    let recent = logger
        .get_recent_events(Duration::from_secs(3600), &EventFilter::default())
        .unwrap();
    assert_eq!(recent.len(), 8);
}

#[test]
fn retention_drops_oldest_backup() {
    let dir = tempfile::tempdir().unwrap();
    let line = one_line_len();
    let logger = AuditLogger::new(&AuditConfig {
        log_path: dir.path().join("audit.log"),
        // One line per file.
        max_bytes: line + line / 2,
        backup_count: 2,
    });

    let ids: Vec<Uuid> = (0..5)
        .map(|_| {
            let event = AuditEvent::new(EventKind::RecordAccepted, "indeed");
            let id = event.event_id;
            logger.log_event(event);
            id
        })
        .collect();

    assert!(!logger.backup_path(3).exists());
    let kept: HashSet<Uuid> = logger
        .log_files()
        .iter()
        .flat_map(|p| event_ids_in(p))
        .collect();
    let expected: HashSet<Uuid> = ids[2..].iter().copied().collect();
    assert_eq!(kept, expected);
}

#[test]
fn detector_reads_across_rotated_files() {
    let dir = tempfile::tempdir().unwrap();
    let line = one_line_len();
    let logger = Arc::new(AuditLogger::new(&AuditConfig {
        log_path: dir.path().join("audit.log"),
        max_bytes: line * 4,
        backup_count: 5,
    }));

    for _ in 0..7 {
        logger.log_admission_granted("indeed", 1);
    }
    for _ in 0..3 {
        logger.log_event(AuditEvent::new(EventKind::AdmissionDenied, "indeed"));
    }
    assert!(logger.backup_path(1).exists());

    let findings = AnomalyDetector::new(Arc::clone(&logger))
        .detect(Duration::from_secs(600))
        .unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, AnomalyKind::HighErrorRate);
    assert!((findings[0].value - 0.3).abs() < 1e-9);
}
