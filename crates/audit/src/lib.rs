//! Append-only audit trail and anomaly scans over it.

pub mod anomaly;
pub mod error;
pub mod event;
pub mod logger;
pub mod redact;

pub use anomaly::{AnomalyDetector, AnomalyFinding, AnomalyKind, AnomalyThresholds};
pub use error::AuditError;
pub use event::{AuditEvent, EventKind, Severity};
pub use logger::{AuditLogger, AuditStats, EventFilter};
pub use redact::{redact, REDACTED};
