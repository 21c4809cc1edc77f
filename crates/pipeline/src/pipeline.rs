use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use harvest_admission::{AdmissionControl, AdmissionError, BucketStatus};
use harvest_audit::{
    AnomalyDetector, AnomalyFinding, AuditEvent, AuditLogger, AuditStats, EventFilter, EventKind,
};
use harvest_core::{Fingerprint, JobRecord, PipelineConfig};
use harvest_dedup::{DedupCache, DedupStats, TtlCache};
use harvest_storage::{
    BatchPersister, FlushLoop, FlushObserver, FlushReport, JobBoardStats, PersistStats, PoolStats,
    RecordStore, SqliteStore,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::PipelineError;

const BOARD_STATS_KEY: &str = "job_board";

/// What happened to one record handed to [`Pipeline::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted(Fingerprint),
    Duplicate(Fingerprint),
    /// The pipeline is shutting down and no longer takes records.
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub dedup: DedupStats,
    pub persist: PersistStats,
    pub average_flush_ms: f64,
    pub pool: PoolStats,
    pub admission: Vec<BucketStatus>,
}

/// Writes a persistence event for every flush.
struct AuditFlushes(Arc<AuditLogger>);

impl FlushObserver for AuditFlushes {
    fn on_flush(&self, report: &FlushReport) {
        let event = match &report.error {
            None => AuditEvent::new(EventKind::PersistSuccess, "persister"),
            Some(e) => AuditEvent::new(EventKind::PersistFailure, "persister").with_error(e.clone()),
        };
        self.0.log_event(
            event
                .with_tool("flush")
                .with_metadata("items", report.items)
                .with_metadata("inserted", report.inserted)
                .with_metadata("updated", report.updated)
                .with_metadata("failed_items", report.failed_items)
                .with_duration(Duration::from_millis(report.duration_ms)),
        );
    }
}

/// Everything the fetch workers share. Build one per process and hand out
/// `Arc<Pipeline>` clones.
pub struct Pipeline {
    config: PipelineConfig,
    dedup: DedupCache,
    board_stats: TtlCache<String, JobBoardStats>,
    admission: AdmissionControl,
    persister: Arc<BatchPersister>,
    flush_loop: Mutex<Option<FlushLoop>>,
    audit: Arc<AuditLogger>,
}

impl Pipeline {
    /// Open the SQLite store named in the config and start the flush loop.
    pub async fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let store = SqliteStore::open(&config.store.database_path).await?;
        Self::with_store(config, Arc::new(store))
    }

    /// Build around any store. Must be called inside a tokio runtime.
    pub fn with_store(config: PipelineConfig, store: Arc<dyn RecordStore>) -> Result<Self, PipelineError> {
        config.validate()?;
        let audit = Arc::new(AuditLogger::new(&config.audit));
        let admission = AdmissionControl::new(config.admission.clone())?;
        let persister = Arc::new(
            BatchPersister::new(store, &config.batch, &config.store)
                .with_observer(Arc::new(AuditFlushes(Arc::clone(&audit)))),
        );
        let flush_loop = FlushLoop::spawn(Arc::clone(&persister), config.batch.tick);

        info!(profile = %config.profile_label(), "pipeline started");
        Ok(Self {
            dedup: DedupCache::new(config.dedup.capacity),
            board_stats: TtlCache::new(config.dedup.lookup_capacity, config.dedup.lookup_ttl),
            admission,
            persister,
            flush_loop: Mutex::new(Some(flush_loop)),
            audit,
            config,
        })
    }

    /// Block until `source` may be fetched, or fail with a timeout.
    pub async fn acquire(&self, source: &str, timeout: Duration) -> Result<(), AdmissionError> {
        match self.admission.wait_until_allowed(source, 1, timeout).await {
            Ok(()) => {
                self.audit.log_admission_granted(source, 1);
                Ok(())
            }
            Err(e) => {
                self.audit.log_admission_denied(source, &e.to_string());
                Err(e)
            }
        }
    }

    /// Non-blocking variant of [`acquire`](Self::acquire).
    pub fn try_acquire(&self, source: &str) -> bool {
        let admitted = self.admission.allow(source, 1);
        if admitted {
            self.audit.log_admission_granted(source, 1);
        } else {
            self.audit.log_admission_denied(source, "rate limit reached");
        }
        admitted
    }

    /// Deduplicate a fetched record and queue it for persistence.
    pub fn ingest(&self, record: JobRecord) -> IngestOutcome {
        if self.persister.is_closed() {
            return IngestOutcome::Rejected;
        }
        let (fingerprint, strategy) = Fingerprint::compute(&record);
        if self.dedup.is_duplicate_fingerprint(&fingerprint) {
            debug!(source = %record.source, fingerprint = %fingerprint, "duplicate record");
            self.audit.log_event(
                AuditEvent::new(EventKind::RecordDuplicate, record.source.as_str())
                    .with_metadata("fingerprint", fingerprint.as_str()),
            );
            return IngestOutcome::Duplicate(fingerprint);
        }

        let source = record.source.clone();
        let score = record.score;
        if !self.persister.submit(record, score) {
            // Closed between the check above and the push.
            self.dedup.forget(&fingerprint);
            return IngestOutcome::Rejected;
        }
        self.audit.log_event(
            AuditEvent::new(EventKind::RecordAccepted, source)
                .with_metadata("fingerprint", fingerprint.as_str())
                .with_metadata("strategy", strategy.as_str()),
        );
        IngestOutcome::Accepted(fingerprint)
    }

    /// Remember the `limit` most recently stored fingerprints so a restart
    /// does not resubmit everything it sees first.
    pub async fn warm_dedup_cache(&self, limit: usize) -> Result<usize, PipelineError> {
        let fingerprints = self.persister.recent_fingerprints(limit).await?;
        let count = fingerprints.len();
        for fingerprint in fingerprints {
            self.dedup.mark_seen_fingerprint(fingerprint);
        }
        info!(count, "dedup cache warmed from store");
        Ok(count)
    }

    /// Per-source table statistics, served from the lookup cache while fresh.
    pub async fn job_board_stats(&self) -> Result<JobBoardStats, PipelineError> {
        let key = BOARD_STATS_KEY.to_string();
        if let Some(cached) = self.board_stats.get(&key) {
            return Ok(cached);
        }
        let stats = self.persister.job_board_stats().await?;
        self.board_stats.set(key, stats.clone());
        Ok(stats)
    }

    pub async fn flush_now(&self) -> FlushReport {
        self.persister.flush_now().await
    }

    pub async fn optimize(&self) -> Result<(), PipelineError> {
        let started = std::time::Instant::now();
        match self.persister.optimize().await {
            Ok(()) => {
                self.audit.log_operation_success(
                    "persister",
                    "optimize",
                    serde_json::Value::Null,
                    None,
                    started.elapsed(),
                );
                Ok(())
            }
            Err(e) => {
                self.audit.log_operation_failure(
                    "persister",
                    "optimize",
                    serde_json::Value::Null,
                    &e.to_string(),
                    started.elapsed(),
                );
                Err(e.into())
            }
        }
    }

    pub fn recent_events(&self, window: Duration, filter: &EventFilter) -> Result<Vec<AuditEvent>, PipelineError> {
        Ok(self.audit.get_recent_events(window, filter)?)
    }

    pub fn audit_stats(&self, window: Duration) -> Result<AuditStats, PipelineError> {
        Ok(self.audit.get_stats(window)?)
    }

    pub fn detect_anomalies(&self, window: Duration) -> Result<Vec<AnomalyFinding>, PipelineError> {
        Ok(AnomalyDetector::new(Arc::clone(&self.audit)).detect(window)?)
    }

    pub fn stats(&self) -> PipelineStats {
        let persist = self.persister.stats();
        PipelineStats {
            dedup: self.dedup.stats(),
            average_flush_ms: persist.average_flush_ms(),
            persist,
            pool: self.persister.pool_stats(),
            admission: self
                .admission
                .sources()
                .iter()
                .map(|source| self.admission.status(source))
                .collect(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// Stop the flush loop after one final flush. Later calls are no-ops.
    pub async fn shutdown(&self) -> Result<FlushReport, PipelineError> {
        let flush_loop = self
            .flush_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(flush_loop) = flush_loop else {
            debug!("pipeline already shut down");
            return Ok(FlushReport::default());
        };
        let report = flush_loop.shutdown().await?;
        info!(final_items = report.items, "pipeline shut down");
        Ok(report)
    }
}
