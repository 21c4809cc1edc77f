//! Batched persistence engine.
//!
//! Producers call [`BatchPersister::submit`], which only touches the pending
//! queue. Flushes swap the queue out under its lock and do all store I/O
//! afterwards, so a slow database never blocks a producer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use harvest_core::config::{BatchConfig, StoreConfig};
use harvest_core::{Fingerprint, JobRecord};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::batcher::PendingBatch;
use crate::error::StoreError;
use crate::pool::{ConnectionPool, PoolStats};
use crate::store::{BatchItem, JobBoardStats, RecordStore, StoredJob, UpsertOutcome};

/// Running totals since startup.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PersistStats {
    pub submitted: u64,
    /// Items that created a new row.
    pub accepted: u64,
    /// Items that bumped an existing row.
    pub updated: u64,
    pub flush_count: u64,
    pub total_flush_time_ms: u64,
    pub failed_items: u64,
    pub failed_flushes: u64,
    /// Items lost to failed flushes. They are not requeued.
    pub dropped_items: u64,
    pub pending: usize,
}

impl PersistStats {
    pub fn average_flush_ms(&self) -> f64 {
        if self.flush_count == 0 {
            0.0
        } else {
            self.total_flush_time_ms as f64 / self.flush_count as f64
        }
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FlushReport {
    pub items: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed_items: usize,
    pub duration_ms: u64,
    /// Set when the whole flush was abandoned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }
}

/// Told about every non-empty flush, whichever path triggered it.
pub trait FlushObserver: Send + Sync {
    fn on_flush(&self, report: &FlushReport);
}

pub struct BatchPersister {
    pending: Mutex<PendingBatch>,
    pool: ConnectionPool,
    stats: Mutex<PersistStats>,
    flush_signal: Notify,
    observer: Option<Arc<dyn FlushObserver>>,
}

impl BatchPersister {
    pub fn new(store: Arc<dyn RecordStore>, batch: &BatchConfig, pool: &StoreConfig) -> Self {
        Self {
            pending: Mutex::new(PendingBatch::new(batch.size, batch.interval)),
            pool: ConnectionPool::new(store, pool.pool_size, pool.checkout_timeout),
            stats: Mutex::new(PersistStats::default()),
            flush_signal: Notify::new(),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FlushObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Queue a record for the next flush. Returns `false` once the persister
    /// has been closed for shutdown.
    pub fn submit(&self, record: JobRecord, score: f64) -> bool {
        let item = BatchItem::new(record, score);
        let due = {
            let mut pending = self.pending();
            if pending.is_closed() {
                drop(pending);
                warn!(source = %item.record.source, "submit after shutdown, record dropped");
                return false;
            }
            pending.push(item);
            pending.should_flush()
        };
        self.stats_guard().submitted += 1;
        if due {
            self.flush_signal.notify_one();
        }
        true
    }

    /// Flush whatever is pending, ignoring thresholds.
    pub async fn flush_now(&self) -> FlushReport {
        let items = self.pending().take();
        self.write_batch(items).await
    }

    /// Flush only when a threshold has been met.
    pub async fn flush_if_due(&self) -> Option<FlushReport> {
        let items = {
            let mut pending = self.pending();
            if !pending.should_flush() {
                return None;
            }
            pending.take()
        };
        Some(self.write_batch(items).await)
    }

    async fn write_batch(&self, items: Vec<BatchItem>) -> FlushReport {
        if items.is_empty() {
            return FlushReport::default();
        }
        let started = Instant::now();
        let mut report = FlushReport {
            items: items.len(),
            ..Default::default()
        };

        if let Err(e) = self.write_items(&items, &mut report).await {
            error!(items = items.len(), error = %e, "flush failed, batch dropped");
            report.error = Some(e.to_string());
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        let mut stats = self.stats_guard();
        match report.error {
            None => {
                stats.accepted += report.inserted as u64;
                stats.updated += report.updated as u64;
                stats.failed_items += report.failed_items as u64;
                stats.flush_count += 1;
                stats.total_flush_time_ms += report.duration_ms;
                info!(
                    items = report.items,
                    inserted = report.inserted,
                    updated = report.updated,
                    failed = report.failed_items,
                    ms = report.duration_ms,
                    "flushed batch"
                );
            }
            Some(_) => {
                stats.failed_flushes += 1;
                stats.dropped_items += report.items as u64;
            }
        }
        drop(stats);

        if let Some(observer) = &self.observer {
            observer.on_flush(&report);
        }
        report
    }

    async fn write_items(&self, items: &[BatchItem], report: &mut FlushReport) -> Result<(), StoreError> {
        let mut slot = self.pool.checkout().await?;
        slot.begin().await?;

        for item in items {
            match slot.upsert(item).await {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Updated { observed_count }) => {
                    debug!(fingerprint = %item.fingerprint, observed_count, "bumped existing record");
                    report.updated += 1;
                }
                Err(e) => {
                    warn!(
                        fingerprint = %item.fingerprint,
                        source = %item.record.source,
                        error = %e,
                        "skipping item that failed to persist"
                    );
                    report.failed_items += 1;
                }
            }
        }

        if let Err(e) = slot.commit().await {
            if let Err(rollback) = slot.rollback().await {
                warn!(error = %rollback, "rollback after failed commit also failed");
            }
            report.inserted = 0;
            report.updated = 0;
            return Err(e);
        }
        Ok(())
    }

    /// Run store maintenance on a pooled slot, out of band with flushing.
    pub async fn optimize(&self) -> Result<(), StoreError> {
        let started = Instant::now();
        let mut slot = self.pool.checkout().await?;
        slot.optimize().await?;
        info!(ms = started.elapsed().as_millis() as u64, "store optimized");
        Ok(())
    }

    pub async fn job_board_stats(&self) -> Result<JobBoardStats, StoreError> {
        let mut slot = self.pool.checkout().await?;
        slot.job_board_stats().await
    }

    pub async fn recent_fingerprints(&self, limit: usize) -> Result<Vec<Fingerprint>, StoreError> {
        let mut slot = self.pool.checkout().await?;
        slot.recent_fingerprints(limit).await
    }

    pub async fn find(&self, fingerprint: &Fingerprint) -> Result<Option<StoredJob>, StoreError> {
        let mut slot = self.pool.checkout().await?;
        slot.find(fingerprint).await
    }

    pub fn stats(&self) -> PersistStats {
        let pending = self.pending().len();
        let mut stats = self.stats_guard().clone();
        stats.pending = pending;
        stats
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Stop accepting submissions. Pending items stay queued for a final flush.
    pub fn close(&self) {
        self.pending().close();
    }

    pub fn is_closed(&self) -> bool {
        self.pending().is_closed()
    }

    /// Release pooled connections. Call after the final flush.
    pub fn close_pool(&self) {
        self.pool.close();
    }

    pub(crate) fn flush_signal(&self) -> &Notify {
        &self.flush_signal
    }

    fn pending(&self) -> MutexGuard<'_, PendingBatch> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats_guard(&self) -> MutexGuard<'_, PersistStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
