//! Background flush task.
//!
//! Wakes on a fixed tick (time threshold) or when `submit` reports the size
//! threshold reached. A shutdown request closes the persister to new work,
//! forces one last flush and ends the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::persister::{BatchPersister, FlushReport};

pub struct FlushLoop {
    shutdown: Arc<Notify>,
    handle: JoinHandle<FlushReport>,
}

impl FlushLoop {
    /// Start the loop on the current tokio runtime.
    pub fn spawn(persister: Arc<BatchPersister>, tick: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run(persister, tick, Arc::clone(&shutdown)));
        Self { shutdown, handle }
    }

    /// Ask the loop to drain and wait for the final flush.
    pub async fn shutdown(self) -> Result<FlushReport, StoreError> {
        // notify_one stores a permit, so a loop that is mid-flush still sees it.
        self.shutdown.notify_one();
        self.handle
            .await
            .map_err(|e| StoreError::Join(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

async fn run(persister: Arc<BatchPersister>, tick: Duration, shutdown: Arc<Notify>) -> FlushReport {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(tick_ms = tick.as_millis() as u64, "flush loop started");

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = persister.flush_signal().notified() => {
                debug!("size threshold reached");
                persister.flush_if_due().await;
            }
            _ = interval.tick() => {
                persister.flush_if_due().await;
            }
        }
    }

    persister.close();
    let report = persister.flush_now().await;
    persister.close_pool();
    info!(items = report.items, "flush loop stopped after final flush");
    report
}
