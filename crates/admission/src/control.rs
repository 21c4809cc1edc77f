use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use harvest_core::config::AdmissionConfig;
use harvest_core::RateLimit;
use serde::Serialize;
use tracing::{debug, info};

use crate::bucket::RateBucket;
use crate::error::AdmissionError;

/// Default interval between admission retries in [`AdmissionControl::wait_until_allowed`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Point-in-time view of one source's bucket.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BucketStatus {
    pub source: String,
    pub max_requests: u32,
    pub window_secs: f64,
    pub in_window: usize,
    pub remaining: usize,
    pub wait_estimate_ms: u64,
}

type SharedBucket = Arc<Mutex<RateBucket>>;

/// Registry of per-source rate buckets.
///
/// Buckets are created lazily on first use and live for the lifetime of the
/// registry. Each bucket has its own lock, so sources never contend with one
/// another; the registry lock is only held long enough to find the bucket.
pub struct AdmissionControl {
    config: AdmissionConfig,
    buckets: Mutex<HashMap<String, SharedBucket>>,
    poll_interval: Duration,
}

impl AdmissionControl {
    /// Build a registry, rejecting any zero-valued limit up front.
    pub fn new(config: AdmissionConfig) -> Result<Self, AdmissionError> {
        let limits = std::iter::once(&config.default_limit).chain(config.source_limits.values());
        for limit in limits {
            RateLimit::new(limit.max_requests, limit.window)?;
        }
        Ok(Self {
            config,
            buckets: Mutex::new(HashMap::new()),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Non-blocking admission check for `tokens` requests against `source`.
    pub fn allow(&self, source: &str, tokens: u32) -> bool {
        self.allow_at(source, tokens, Instant::now())
    }

    /// [`allow`](Self::allow) evaluated at an explicit instant.
    pub fn allow_at(&self, source: &str, tokens: u32, now: Instant) -> bool {
        let bucket = self.bucket(source);
        let admitted = lock(&bucket).try_acquire(tokens, now);
        if !admitted {
            debug!(source = %source, tokens, "admission denied");
        }
        admitted
    }

    /// Retry [`allow`](Self::allow) every poll interval until it succeeds or
    /// `timeout` elapses.
    pub async fn wait_until_allowed(
        &self,
        source: &str,
        tokens: u32,
        timeout: Duration,
    ) -> Result<(), AdmissionError> {
        let max = self.limit_for(source).max_requests;
        if tokens > max {
            return Err(AdmissionError::ExceedsCapacity {
                source_name: source.to_string(),
                tokens,
                max,
            });
        }

        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if self.allow(source, tokens) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                info!(source = %source, waited_ms = %started.elapsed().as_millis(), "admission wait timed out");
                return Err(AdmissionError::Timeout {
                    source_name: source.to_string(),
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Time until the oldest request for `source` leaves its window.
    pub fn wait_estimate(&self, source: &str) -> Duration {
        let bucket = self.bucket(source);
        let estimate = lock(&bucket).wait_estimate(Instant::now());
        estimate
    }

    pub fn status(&self, source: &str) -> BucketStatus {
        let now = Instant::now();
        let bucket = self.bucket(source);
        let mut bucket = lock(&bucket);
        let limit = bucket.limit();
        let in_window = bucket.in_window(now);
        BucketStatus {
            source: normalize_source(source),
            max_requests: limit.max_requests,
            window_secs: limit.window.as_secs_f64(),
            in_window,
            remaining: (limit.max_requests as usize).saturating_sub(in_window),
            wait_estimate_ms: bucket.wait_estimate(now).as_millis() as u64,
        }
    }

    /// Limit that applies (or will apply) to `source`.
    pub fn limit_for(&self, source: &str) -> RateLimit {
        self.config.limit_for(&normalize_source(source))
    }

    /// Sources that currently have a bucket, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.registry().keys().cloned().collect();
        sources.sort();
        sources
    }

    /// Clear one source's history. The bucket itself is kept.
    pub fn reset(&self, source: &str) {
        if let Some(bucket) = self.registry().get(&normalize_source(source)) {
            lock(bucket).clear();
        }
    }

    pub fn reset_all(&self) {
        for bucket in self.registry().values() {
            lock(bucket).clear();
        }
    }

    fn bucket(&self, source: &str) -> SharedBucket {
        let key = normalize_source(source);
        let mut registry = self.registry();
        if let Some(bucket) = registry.get(&key) {
            return Arc::clone(bucket);
        }
        let limit = self.config.limit_for(&key);
        debug!(source = %key, limit = %limit, "creating rate bucket");
        let bucket = Arc::new(Mutex::new(RateBucket::new(limit)));
        registry.insert(key, Arc::clone(&bucket));
        bucket
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, SharedBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(bucket: &SharedBucket) -> MutexGuard<'_, RateBucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}

fn normalize_source(source: &str) -> String {
    source.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_with(limits: &[(&str, u32, u64)]) -> AdmissionControl {
        let mut config = AdmissionConfig::default();
        for (source, max, secs) in limits {
            config
                .source_limits
                .insert(source.to_string(), RateLimit::per_secs(*max, *secs).unwrap());
        }
        AdmissionControl::new(config).unwrap()
    }

    #[test]
    fn board_with_two_per_minute_denies_third_call() {
        let control = control_with(&[("boardx", 2, 60)]);
        let results: Vec<bool> = (0..3).map(|_| control.allow("boardX", 1)).collect();
        assert_eq!(results, vec![true, true, false]);
    }

    #[test]
    fn sources_do_not_share_buckets() {
        let control = control_with(&[("a", 1, 60), ("b", 1, 60)]);
        assert!(control.allow("a", 1));
        assert!(control.allow("b", 1));
        assert!(!control.allow("a", 1));
    }

    #[test]
    fn unknown_source_uses_default_limit() {
        let control = control_with(&[]);
        let default = AdmissionConfig::default().default_limit;
        assert_eq!(control.limit_for("never-heard-of-it"), default);
        for _ in 0..default.max_requests {
            assert!(control.allow("never-heard-of-it", 1));
        }
        assert!(!control.allow("never-heard-of-it", 1));
    }

    #[test]
    fn zero_limit_rejected_at_construction() {
        let mut config = AdmissionConfig::default();
        config.source_limits.insert(
            "broken".into(),
            RateLimit { max_requests: 0, window: Duration::from_secs(60) },
        );
        assert!(matches!(
            AdmissionControl::new(config),
            Err(AdmissionError::InvalidLimit(_))
        ));
    }

    #[test]
    fn reset_clears_history() {
        let control = control_with(&[("boardx", 1, 60)]);
        assert!(control.allow("boardx", 1));
        assert!(!control.allow("boardx", 1));
        control.reset("BoardX");
        assert!(control.allow("boardx", 1));

        assert!(!control.allow("boardx", 1));
        control.reset_all();
        assert!(control.allow("boardx", 1));
    }

    #[test]
    fn status_reports_remaining_and_wait() {
        let control = control_with(&[("boardx", 3, 60)]);
        control.allow("boardx", 2);
        let status = control.status("boardx");
        assert_eq!(status.in_window, 2);
        assert_eq!(status.remaining, 1);
        assert!(status.wait_estimate_ms > 59_000);
        assert_eq!(control.sources(), vec!["boardx".to_string()]);
    }

    #[test]
    fn explicit_instants_slide_the_window() {
        let control = control_with(&[("boardx", 2, 60)]);
        let t0 = Instant::now();
        assert!(control.allow_at("boardx", 2, t0));
        assert!(!control.allow_at("boardx", 1, t0 + Duration::from_secs(30)));
        assert!(control.allow_at("boardx", 1, t0 + Duration::from_secs(61)));
    }

    #[tokio::test]
    async fn wait_succeeds_once_window_slides() {
        let mut config = AdmissionConfig::default();
        config.source_limits.insert(
            "fast".into(),
            RateLimit::new(1, Duration::from_millis(100)).unwrap(),
        );
        let control = AdmissionControl::new(config)
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));

        assert!(control.allow("fast", 1));
        let started = Instant::now();
        control
            .wait_until_allowed("fast", 1, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn wait_times_out_with_typed_error() {
        let control = control_with(&[("slow", 1, 60)]).with_poll_interval(Duration::from_millis(10));
        assert!(control.allow("slow", 1));
        let err = control
            .wait_until_allowed("slow", 1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("slow"));
    }

    #[tokio::test]
    async fn oversized_request_fails_fast() {
        let control = control_with(&[("boardx", 2, 60)]);
        let err = control
            .wait_until_allowed("boardx", 3, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::ExceedsCapacity { tokens: 3, max: 2, .. }));
    }
}
