use std::collections::VecDeque;
use std::time::{Duration, Instant};

use harvest_core::RateLimit;

/// Sliding-window request log for one source.
///
/// Holds one timestamp per admitted token. A token counts against the limit
/// while it is younger than the window, so at most `max_requests` tokens are
/// ever admitted inside any window-length interval.
#[derive(Debug, Clone)]
pub struct RateBucket {
    limit: RateLimit,
    timestamps: VecDeque<Instant>,
}

impl RateBucket {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            timestamps: VecDeque::with_capacity(limit.max_requests as usize),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Purge expired timestamps, then admit `tokens` if they fit. Admitted
    /// tokens are recorded at `now` before returning.
    pub fn try_acquire(&mut self, tokens: u32, now: Instant) -> bool {
        self.purge(now);
        if self.timestamps.len() + tokens as usize > self.limit.max_requests as usize {
            return false;
        }
        for _ in 0..tokens {
            self.timestamps.push_back(now);
        }
        true
    }

    /// Time until the oldest recorded timestamp leaves the window.
    /// Zero when the bucket is empty or the oldest entry has already expired.
    pub fn wait_estimate(&self, now: Instant) -> Duration {
        match self.timestamps.front() {
            Some(oldest) => (*oldest + self.limit.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Tokens currently counted against the limit.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.purge(now);
        self.timestamps.len()
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
    }

    fn purge(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.limit.window) else {
            return;
        };
        // Timestamps are pushed in non-decreasing order, so expired ones are at the front.
        while self.timestamps.front().is_some_and(|t| *t <= cutoff) {
            self.timestamps.pop_front();
        }
    }
}
