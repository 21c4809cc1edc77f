//! Batched persistence of accepted job records.

pub mod batcher;
pub mod error;
pub mod flush_loop;
pub mod persister;
pub mod pool;
pub mod sqlite;
pub mod store;

pub use batcher::PendingBatch;
pub use error::StoreError;
pub use flush_loop::FlushLoop;
pub use persister::{BatchPersister, FlushObserver, FlushReport, PersistStats};
pub use pool::{ConnectionPool, PoolStats, PooledSlot};
pub use sqlite::SqliteStore;
pub use store::{
    BatchItem, JobBoardStats, RecordStore, SourceStats, StoreConnection, StoredJob, UpsertOutcome,
};
