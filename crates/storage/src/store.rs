//! Store seam: what the persistence engine needs from the job table.
//!
//! [`RecordStore`] opens connections, [`StoreConnection`] is one checked-out
//! handle. The engine drives the transaction itself so that a failing row
//! can be skipped without abandoning the rest of the batch.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use harvest_core::{Fingerprint, FingerprintStrategy, JobRecord};
use serde::Serialize;

use crate::error::StoreError;

/// An accepted record waiting in the pending queue.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub record: JobRecord,
    pub fingerprint: Fingerprint,
    pub strategy: FingerprintStrategy,
    pub score: f64,
    pub enqueued_at: DateTime<Utc>,
}

impl BatchItem {
    pub fn new(record: JobRecord, score: f64) -> Self {
        let (fingerprint, strategy) = Fingerprint::compute(&record);
        Self {
            record,
            fingerprint,
            strategy,
            score,
            enqueued_at: Utc::now(),
        }
    }

    /// Enqueue time in the fixed-width form stored in `first_seen`/`last_seen`.
    pub fn enqueued_at_text(&self) -> String {
        self.enqueued_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// What an upsert did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Row existed; `observed_count` is the new count.
    Updated { observed_count: i64 },
}

/// A row read back from the job table.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredJob {
    pub fingerprint: String,
    pub strategy: String,
    pub source: String,
    pub title: Option<String>,
    pub organization: Option<String>,
    pub url: Option<String>,
    pub score: Option<f64>,
    pub observed_count: i64,
    pub first_seen: String,
    pub last_seen: String,
}

/// Per-source aggregate.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceStats {
    pub source: String,
    pub records: i64,
    pub observations: i64,
    pub last_seen: Option<String>,
}

/// Aggregate view over the whole job table.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct JobBoardStats {
    pub total_records: i64,
    pub total_observations: i64,
    pub sources: Vec<SourceStats>,
}

impl JobBoardStats {
    pub fn from_sources(sources: Vec<SourceStats>) -> Self {
        Self {
            total_records: sources.iter().map(|s| s.records).sum(),
            total_observations: sources.iter().map(|s| s.observations).sum(),
            sources,
        }
    }
}

/// Opens connections to the persistent store.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError>;
}

/// One live handle to the store. Owned by the pool, lent to one flush at a time.
#[async_trait]
pub trait StoreConnection: Send {
    async fn begin(&mut self) -> Result<(), StoreError>;

    /// Insert a new row, or bump `observed_count`, refresh `last_seen` and
    /// overwrite stored fields with any non-empty incoming ones.
    async fn upsert(&mut self, item: &BatchItem) -> Result<UpsertOutcome, StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;

    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Compaction / planner maintenance. Must not run inside a transaction.
    async fn optimize(&mut self) -> Result<(), StoreError>;

    async fn find(&mut self, fingerprint: &Fingerprint) -> Result<Option<StoredJob>, StoreError>;

    async fn job_board_stats(&mut self) -> Result<JobBoardStats, StoreError>;

    /// Most recently seen fingerprints, newest first.
    async fn recent_fingerprints(&mut self, limit: usize) -> Result<Vec<Fingerprint>, StoreError>;
}
