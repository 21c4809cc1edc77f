use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AuditError;

/// What happened. Serialized in snake_case; `blocked` is accepted as an
/// alias for `admission_denied`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AdmissionGranted,
    #[serde(alias = "blocked")]
    AdmissionDenied,
    RecordAccepted,
    RecordDuplicate,
    PersistSuccess,
    PersistFailure,
    OperationSuccess,
    OperationFailure,
    AuthFailure,
    SecurityEvent,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::AdmissionGranted,
        EventKind::AdmissionDenied,
        EventKind::RecordAccepted,
        EventKind::RecordDuplicate,
        EventKind::PersistSuccess,
        EventKind::PersistFailure,
        EventKind::OperationSuccess,
        EventKind::OperationFailure,
        EventKind::AuthFailure,
        EventKind::SecurityEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AdmissionGranted => "admission_granted",
            EventKind::AdmissionDenied => "admission_denied",
            EventKind::RecordAccepted => "record_accepted",
            EventKind::RecordDuplicate => "record_duplicate",
            EventKind::PersistSuccess => "persist_success",
            EventKind::PersistFailure => "persist_failure",
            EventKind::OperationSuccess => "operation_success",
            EventKind::OperationFailure => "operation_failure",
            EventKind::AuthFailure => "auth_failure",
            EventKind::SecurityEvent => "security_event",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::PersistFailure | EventKind::OperationFailure | EventKind::AuthFailure
        )
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, EventKind::AdmissionDenied)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if wanted == "blocked" {
            return Ok(EventKind::AdmissionDenied);
        }
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| AuditError::UnknownKind(s.to_string()))
    }
}

/// Severity of security events and anomaly findings. Ordered low to critical.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log. Never modified once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// Job board or component the event concerns.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(kind: EventKind, source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            source: source.into(),
            tool: None,
            arguments: Value::Null,
            result: None,
            error: None,
            metadata: Map::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// Arguments are redacted by the logger before they are written.
    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_duration(self, duration: Duration) -> Self {
        self.with_metadata("duration_ms", duration.as_secs_f64() * 1_000.0)
    }

    pub fn with_severity(self, severity: Severity) -> Self {
        self.with_metadata("severity", severity.as_str())
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.metadata.get("duration_ms").and_then(Value::as_f64)
    }

    /// Failure kinds, denials, and anything carrying an error message.
    pub fn is_error(&self) -> bool {
        self.kind.is_failure() || self.kind.is_denied() || self.error.is_some()
    }
}
