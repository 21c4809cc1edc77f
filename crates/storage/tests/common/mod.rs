//! In-memory store with switchable failures, shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::config::{BatchConfig, StoreConfig};
use harvest_core::{Fingerprint, JobRecord};
use harvest_storage::{
    BatchItem, BatchPersister, JobBoardStats, RecordStore, SourceStats, StoreConnection, StoreError,
    StoredJob, UpsertOutcome,
};

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, StoredJob>>,
    failing: Mutex<HashSet<String>>,
    fail_commit: AtomicBool,
    pub connects: AtomicUsize,
    pub commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make upserts of this external id fail.
    pub fn fail_on(&self, external_id: &str) {
        self.failing.lock().unwrap().insert(external_id.to_string());
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn row(&self, record: &JobRecord) -> Option<StoredJob> {
        let fingerprint = Fingerprint::of(record);
        self.rows.lock().unwrap().get(fingerprint.as_str()).cloned()
    }
}

pub struct MemoryConn {
    store: Arc<MemoryStore>,
    staged: Option<HashMap<String, StoredJob>>,
}

/// Wraps the shared store so the pool can own a `RecordStore` while the
/// test keeps a handle to inspect rows.
pub struct SharedMemoryStore(pub Arc<MemoryStore>);

#[async_trait]
impl RecordStore for SharedMemoryStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConn {
            store: Arc::clone(&self.0),
            staged: None,
        }))
    }
}

#[async_trait]
impl StoreConnection for MemoryConn {
    async fn begin(&mut self) -> Result<(), StoreError> {
        self.staged = Some(self.store.rows.lock().unwrap().clone());
        Ok(())
    }

    async fn upsert(&mut self, item: &BatchItem) -> Result<UpsertOutcome, StoreError> {
        if let Some(id) = item.record.external_id() {
            if self.store.failing.lock().unwrap().contains(id) {
                return Err(StoreError::Other(format!("injected failure for {id}")));
            }
        }
        let staged = self
            .staged
            .as_mut()
            .ok_or_else(|| StoreError::Other("upsert outside transaction".into()))?;
        let seen = item.enqueued_at_text();
        match staged.get_mut(item.fingerprint.as_str()) {
            Some(row) => {
                row.observed_count += 1;
                row.last_seen = seen;
                Ok(UpsertOutcome::Updated {
                    observed_count: row.observed_count,
                })
            }
            None => {
                staged.insert(
                    item.fingerprint.as_str().to_string(),
                    StoredJob {
                        fingerprint: item.fingerprint.as_str().to_string(),
                        strategy: item.strategy.as_str().to_string(),
                        source: item.record.source.clone(),
                        title: Some(item.record.title.clone()),
                        organization: Some(item.record.organization.clone()),
                        url: item.record.url().map(str::to_string),
                        score: Some(item.score),
                        observed_count: 1,
                        first_seen: seen.clone(),
                        last_seen: seen,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.store.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Other("injected commit failure".into()));
        }
        if let Some(staged) = self.staged.take() {
            *self.store.rows.lock().unwrap() = staged;
        }
        self.store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.staged = None;
        Ok(())
    }

    async fn optimize(&mut self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find(&mut self, fingerprint: &Fingerprint) -> Result<Option<StoredJob>, StoreError> {
        Ok(self.store.rows.lock().unwrap().get(fingerprint.as_str()).cloned())
    }

    async fn job_board_stats(&mut self) -> Result<JobBoardStats, StoreError> {
        let rows = self.store.rows.lock().unwrap();
        let mut by_source: HashMap<String, SourceStats> = HashMap::new();
        for row in rows.values() {
            let entry = by_source.entry(row.source.clone()).or_insert_with(|| SourceStats {
                source: row.source.clone(),
                records: 0,
                observations: 0,
                last_seen: None,
            });
            entry.records += 1;
            entry.observations += row.observed_count;
        }
        let mut sources: Vec<_> = by_source.into_values().collect();
        sources.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(JobBoardStats::from_sources(sources))
    }

    async fn recent_fingerprints(&mut self, limit: usize) -> Result<Vec<Fingerprint>, StoreError> {
        let rows = self.store.rows.lock().unwrap();
        let mut all: Vec<_> = rows.values().collect();
        all.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(all
            .into_iter()
            .take(limit)
            .map(|row| Fingerprint::from_hex(row.fingerprint.clone()))
            .collect())
    }
}

pub fn batch_config(size: usize, interval_ms: u64) -> BatchConfig {
    BatchConfig {
        size,
        interval: Duration::from_millis(interval_ms),
        tick: Duration::from_millis(10),
    }
}

pub fn store_config(pool_size: usize) -> StoreConfig {
    StoreConfig {
        pool_size,
        checkout_timeout: Duration::from_millis(200),
        ..StoreConfig::default()
    }
}

pub fn memory_persister(size: usize, interval_ms: u64) -> (Arc<MemoryStore>, Arc<BatchPersister>) {
    let store = MemoryStore::new();
    let persister = BatchPersister::new(
        Arc::new(SharedMemoryStore(Arc::clone(&store))),
        &batch_config(size, interval_ms),
        &store_config(2),
    );
    (store, Arc::new(persister))
}

pub fn job(source: &str, id: &str) -> JobRecord {
    JobRecord::new(source)
        .with_external_id(id)
        .with_content("Acme", "Rust Engineer", "Build pipelines")
}
