use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

use crate::error::StoreError;
use crate::store::{RecordStore, StoreConnection};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub max_size: usize,
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
}

/// Bounded pool of store connections.
///
/// At most `max_size` slots are checked out at once. Slots are created lazily
/// on first demand and recycled on drop; they are only discarded when the
/// pool is closed.
pub struct ConnectionPool {
    store: Arc<dyn RecordStore>,
    idle: Mutex<Vec<Box<dyn StoreConnection>>>,
    permits: Semaphore,
    max_size: usize,
    created: AtomicUsize,
    checkout_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(store: Arc<dyn RecordStore>, max_size: usize, checkout_timeout: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            store,
            idle: Mutex::new(Vec::with_capacity(max_size)),
            permits: Semaphore::new(max_size),
            max_size,
            created: AtomicUsize::new(0),
            checkout_timeout,
        }
    }

    /// Borrow a slot, waiting up to the checkout timeout for one to free up.
    pub async fn checkout(&self) -> Result<PooledSlot<'_>, StoreError> {
        let permit = match tokio::time::timeout(self.checkout_timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::PoolClosed),
            Err(_) => {
                return Err(StoreError::PoolTimeout(
                    self.checkout_timeout.as_millis() as u64,
                ))
            }
        };

        let recycled = self.idle().pop();
        let conn = match recycled {
            Some(conn) => conn,
            None => {
                let conn = self.store.connect().await?;
                let created = self.created.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(created, max = self.max_size, "created pool slot");
                conn
            }
        };

        Ok(PooledSlot {
            pool: self,
            conn: ManuallyDrop::new(conn),
            _permit: permit,
        })
    }

    /// Refuse further checkouts and drop idle slots. Slots still checked out
    /// are dropped when their holder releases them.
    pub fn close(&self) {
        self.permits.close();
        self.idle().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        let in_use = if self.is_closed() {
            0
        } else {
            self.max_size - self.permits.available_permits()
        };
        PoolStats {
            max_size: self.max_size,
            created: self.created.load(Ordering::Relaxed),
            idle: self.idle().len(),
            in_use,
        }
    }

    fn idle(&self) -> MutexGuard<'_, Vec<Box<dyn StoreConnection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out slot. Returns itself to the pool when dropped.
pub struct PooledSlot<'a> {
    pool: &'a ConnectionPool,
    conn: ManuallyDrop<Box<dyn StoreConnection>>,
    // Released after `drop` has pushed the connection back, so a waiter that
    // wakes on the permit finds an idle slot.
    _permit: SemaphorePermit<'a>,
}

impl Deref for PooledSlot<'_> {
    type Target = dyn StoreConnection;

    fn deref(&self) -> &Self::Target {
        &**self.conn
    }
}

impl DerefMut for PooledSlot<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut **self.conn
    }
}

impl Drop for PooledSlot<'_> {
    fn drop(&mut self) {
        // SAFETY: `conn` is taken exactly once, here, and never touched again.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        if !self.pool.is_closed() {
            self.pool.idle().push(conn);
        }
    }
}
