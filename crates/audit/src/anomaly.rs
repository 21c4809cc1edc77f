//! Rule-based anomaly scan over a window of audit events.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::AuditError;
use crate::event::{AuditEvent, EventKind, Severity};
use crate::logger::{AuditLogger, EventFilter};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    HighErrorRate,
    ExcessiveBlocking,
    AuthenticationFailures,
    SecurityEvents,
    UnusualActivity,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::HighErrorRate => "high_error_rate",
            AnomalyKind::ExcessiveBlocking => "excessive_blocking",
            AnomalyKind::AuthenticationFailures => "authentication_failures",
            AnomalyKind::SecurityEvents => "security_events",
            AnomalyKind::UnusualActivity => "unusual_activity",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnomalyFinding {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
    pub remediation: String,
    /// The measured quantity that tripped the rule.
    pub value: f64,
    /// Set for per-source findings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyThresholds {
    /// Error fraction above which the window is flagged.
    pub error_rate: f64,
    /// Denied admissions above which the window is flagged.
    pub blocked_events: usize,
    /// A source is unusual above this multiple of the per-source mean...
    pub spike_factor: f64,
    /// ...and above this absolute event count.
    pub spike_min_events: usize,
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.20,
            blocked_events: 10,
            spike_factor: 3.0,
            spike_min_events: 50,
        }
    }
}

pub struct AnomalyDetector {
    logger: Arc<AuditLogger>,
    thresholds: AnomalyThresholds,
}

impl AnomalyDetector {
    pub fn new(logger: Arc<AuditLogger>) -> Self {
        Self::with_thresholds(logger, AnomalyThresholds::default())
    }

    pub fn with_thresholds(logger: Arc<AuditLogger>, thresholds: AnomalyThresholds) -> Self {
        Self { logger, thresholds }
    }

    /// Scan the last `window` of the log. Findings are sorted most severe first.
    pub fn detect(&self, window: Duration) -> Result<Vec<AnomalyFinding>, AuditError> {
        let events = self.logger.get_recent_events(window, &EventFilter::default())?;
        Ok(analyze(&events, &self.thresholds))
    }
}

/// Apply every rule to `events`.
pub fn analyze(events: &[AuditEvent], thresholds: &AnomalyThresholds) -> Vec<AnomalyFinding> {
    let mut findings = Vec::new();
    if events.is_empty() {
        return findings;
    }

    let total = events.len();
    let errors = events.iter().filter(|e| e.is_error()).count();
    let error_rate = errors as f64 / total as f64;
    if error_rate > thresholds.error_rate {
        findings.push(AnomalyFinding {
            kind: AnomalyKind::HighErrorRate,
            severity: Severity::High,
            description: format!(
                "error rate {:.1}% ({errors} of {total} events)",
                error_rate * 100.0
            ),
            remediation: "Check failing sources and store health; consider pausing the worst offenders."
                .into(),
            value: error_rate,
            source: None,
        });
    }

    let blocked = events.iter().filter(|e| e.kind.is_denied()).count();
    if blocked > thresholds.blocked_events {
        findings.push(AnomalyFinding {
            kind: AnomalyKind::ExcessiveBlocking,
            severity: Severity::Medium,
            description: format!("{blocked} admission denials in window"),
            remediation: "Workers are outrunning their rate limits; reduce concurrency or raise limits."
                .into(),
            value: blocked as f64,
            source: None,
        });
    }

    let auth_failures = events
        .iter()
        .filter(|e| e.kind == EventKind::AuthFailure)
        .count();
    if auth_failures > 0 {
        findings.push(AnomalyFinding {
            kind: AnomalyKind::AuthenticationFailures,
            severity: Severity::High,
            description: format!("{auth_failures} authentication failures"),
            remediation: "Rotate or re-check credentials for the affected sources.".into(),
            value: auth_failures as f64,
            source: None,
        });
    }

    let security = events
        .iter()
        .filter(|e| e.kind == EventKind::SecurityEvent)
        .count();
    if security > 0 {
        findings.push(AnomalyFinding {
            kind: AnomalyKind::SecurityEvents,
            severity: Severity::Critical,
            description: format!("{security} security events recorded"),
            remediation: "Review the security events in the audit log immediately.".into(),
            value: security as f64,
            source: None,
        });
    }

    findings.extend(source_spikes(events, thresholds));

    // Stable sort keeps rule order within a severity.
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));
    findings
}

fn source_spikes(events: &[AuditEvent], thresholds: &AnomalyThresholds) -> Vec<AnomalyFinding> {
    let mut per_source: HashMap<&str, usize> = HashMap::new();
    for event in events {
        *per_source.entry(event.source.as_str()).or_default() += 1;
    }
    let mean = events.len() as f64 / per_source.len() as f64;

    let mut spikes: Vec<_> = per_source
        .into_iter()
        .filter(|(_, count)| {
            *count > thresholds.spike_min_events && *count as f64 > thresholds.spike_factor * mean
        })
        .collect();
    spikes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    spikes
        .into_iter()
        .map(|(source, count)| AnomalyFinding {
            kind: AnomalyKind::UnusualActivity,
            severity: Severity::Medium,
            description: format!(
                "source {source} produced {count} events, {:.1}x the per-source mean of {mean:.1}",
                count as f64 / mean
            ),
            remediation: "Check the source's worker for a retry loop or runaway pagination.".into(),
            value: count as f64,
            source: Some(source.to_string()),
        })
        .collect()
}
