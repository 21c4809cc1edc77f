//! Pending queue for accepted records.
//!
//! Flushes when either the size threshold is reached or the interval has
//! elapsed since the last flush, whichever comes first.

use std::time::{Duration, Instant};

use crate::store::BatchItem;

/// Accumulates batch items between flushes.
pub struct PendingBatch {
    buffer: Vec<BatchItem>,
    max_size: usize,
    interval: Duration,
    last_flush: Instant,
    closed: bool,
}

impl PendingBatch {
    /// - `max_size`: flush when this many items are queued.
    /// - `interval`: flush when this long has passed since the previous flush.
    pub fn new(max_size: usize, interval: Duration) -> Self {
        let max_size = max_size.max(1);
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
            interval,
            last_flush: Instant::now(),
            closed: false,
        }
    }

    pub fn push(&mut self, item: BatchItem) {
        self.buffer.push(item);
    }

    /// Mark the queue closed. Callers check [`is_closed`](Self::is_closed)
    /// under the same lock as [`push`](Self::push), so nothing lands after
    /// the final [`take`](Self::take).
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.max_size
    }

    /// `true` when the queue is non-empty and either threshold has been met.
    pub fn should_flush(&self) -> bool {
        self.should_flush_at(Instant::now())
    }

    pub fn should_flush_at(&self, now: Instant) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        self.is_full() || now.saturating_duration_since(self.last_flush) >= self.interval
    }

    /// Swap the queue for an empty one and restart the interval.
    pub fn take(&mut self) -> Vec<BatchItem> {
        self.last_flush = Instant::now();
        std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_size))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_core::JobRecord;

    fn make_items(count: usize) -> Vec<BatchItem> {
        (0..count)
            .map(|i| BatchItem::new(JobRecord::new("indeed").with_external_id(format!("job-{i}")), 0.5))
            .collect()
    }

    fn filled(max_size: usize, interval: Duration, count: usize) -> PendingBatch {
        let mut batch = PendingBatch::new(max_size, interval);
        for item in make_items(count) {
            batch.push(item);
        }
        batch
    }

    #[test]
    fn test_flush_on_size() {
        let batch = filled(3, Duration::from_secs(60), 3);
        assert!(batch.should_flush());
    }

    #[test]
    fn test_no_flush_below_size() {
        let batch = filled(5, Duration::from_secs(60), 2);
        assert!(!batch.should_flush());
    }

    #[test]
    fn test_flush_on_interval() {
        let batch = filled(100, Duration::from_millis(10), 1);
        let later = Instant::now() + Duration::from_millis(20);
        assert!(batch.should_flush_at(later));
    }

    #[test]
    fn test_empty_never_flushes() {
        let batch = PendingBatch::new(5, Duration::from_millis(1));
        let later = Instant::now() + Duration::from_secs(5);
        assert!(!batch.should_flush_at(later));
    }

    #[test]
    fn test_take_resets_state() {
        let mut batch = filled(2, Duration::from_secs(60), 3);
        let taken = batch.take();
        assert_eq!(taken.len(), 3);
        assert_eq!(batch.len(), 0);
        assert!(batch.is_empty());
        assert!(!batch.should_flush());
    }

    #[test]
    fn test_take_restarts_interval() {
        let mut batch = filled(100, Duration::from_millis(50), 1);
        batch.take();
        batch.push(make_items(1).remove(0));
        assert!(!batch.should_flush_at(Instant::now()));
    }

    #[test]
    fn test_close_keeps_queued_items() {
        let mut batch = filled(10, Duration::from_secs(60), 2);
        batch.close();
        assert!(batch.is_closed());
        assert_eq!(batch.take().len(), 2);
        assert!(batch.is_closed());
    }

    #[test]
    fn test_items_keep_submission_order() {
        let batch_items = make_items(3);
        let mut batch = PendingBatch::new(10, Duration::from_secs(60));
        for item in batch_items {
            batch.push(item);
        }
        let taken = batch.take();
        let ids: Vec<_> = taken.iter().filter_map(|i| i.record.external_id()).collect();
        assert_eq!(ids, vec!["job-0", "job-1", "job-2"]);
    }
}
