use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Built-in per-source limits as (source, max requests, window seconds).
///
/// Scraped boards get tight buckets, official APIs get generous ones.
pub const DEFAULT_SOURCE_LIMITS: &[(&str, u32, u64)] = &[
    ("linkedin", 5, 60),
    ("indeed", 10, 60),
    ("glassdoor", 10, 60),
    ("monster", 20, 60),
    ("remoteok", 30, 60),
    ("greenhouse", 60, 60),
    ("lever", 60, 60),
    ("adzuna", 100, 60),
    ("usajobs", 100, 60),
];

// ── Env lookup ────────────────────────────────────────────────

/// Key lookup used to build a config. `from_env` reads the process
/// environment; tests pass a map.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: Lookup<'_>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        if let Some(v) = lookup(&format!("{}_{}", profile, key)) {
            return Some(v);
        }
    }
    lookup(key)
}

fn profiled_or(lookup: Lookup<'_>, profile: &str, key: &str, default: &str) -> String {
    profiled_opt(lookup, profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_num<T: FromStr>(
    lookup: Lookup<'_>,
    profile: &str,
    key: &str,
    default: T,
) -> Result<T, CoreError> {
    match profiled_opt(lookup, profile, key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CoreError::InvalidConfig(format!("{key}={raw} is not a number"))),
        None => Ok(default),
    }
}

// ── Rate limits ───────────────────────────────────────────────

/// A (max requests, window) pair. Both must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self, CoreError> {
        if max_requests == 0 || window.is_zero() {
            return Err(CoreError::InvalidRateLimit(format!(
                "{}/{}",
                max_requests,
                window.as_secs_f64()
            )));
        }
        Ok(Self {
            max_requests,
            window,
        })
    }

    pub fn per_secs(max_requests: u32, window_secs: u64) -> Result<Self, CoreError> {
        Self::new(max_requests, Duration::from_secs(window_secs))
    }
}

impl FromStr for RateLimit {
    type Err = CoreError;

    /// Parses `<max>/<window_secs>`, e.g. `10/60`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidRateLimit(s.to_string());
        let (max, window) = s.trim().split_once('/').ok_or_else(invalid)?;
        let max: u32 = max.trim().parse().map_err(|_| invalid())?;
        let window: u64 = window.trim().parse().map_err(|_| invalid())?;
        Self::per_secs(max, window).map_err(|_| invalid())
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s", self.max_requests, self.window.as_secs())
    }
}

/// Parse `source=max/window,source=max/window`.
pub fn parse_source_limits(raw: &str) -> Result<BTreeMap<String, RateLimit>, CoreError> {
    let mut limits = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (source, limit) = entry
            .split_once('=')
            .ok_or_else(|| CoreError::InvalidRateLimit(entry.to_string()))?;
        let source = source.trim().to_lowercase();
        if source.is_empty() {
            return Err(CoreError::InvalidRateLimit(entry.to_string()));
        }
        limits.insert(source, limit.parse()?);
    }
    Ok(limits)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    pub dedup: DedupConfig,
    pub batch: BatchConfig,
    pub store: StoreConfig,
    pub admission: AdmissionConfig,
    pub audit: AuditConfig,
}

impl PipelineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `HARVEST_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, CoreError> {
        let profile = env_opt("HARVEST_PROFILE").unwrap_or_default();
        Self::from_lookup(&profile, &env_opt)
    }

    /// Build config for a profile from an arbitrary key lookup.
    pub fn from_lookup(
        profile: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, CoreError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let config = Self {
            profile: p.to_string(),
            dedup: DedupConfig::from_lookup(lookup, p)?,
            batch: BatchConfig::from_lookup(lookup, p)?,
            store: StoreConfig::from_lookup(lookup, p)?,
            admission: AdmissionConfig::from_lookup(lookup, p)?,
            audit: AuditConfig::from_lookup(lookup, p)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would silently disable a component.
    pub fn validate(&self) -> Result<(), CoreError> {
        let checks = [
            (self.dedup.capacity == 0, "DEDUP_CACHE_CAPACITY must be > 0"),
            (self.dedup.lookup_capacity == 0, "LOOKUP_CACHE_CAPACITY must be > 0"),
            (self.dedup.lookup_ttl.is_zero(), "LOOKUP_CACHE_TTL_SECS must be > 0"),
            (self.batch.size == 0, "BATCH_SIZE must be > 0"),
            (self.batch.interval.is_zero(), "BATCH_INTERVAL_MS must be > 0"),
            (self.batch.tick.is_zero(), "FLUSH_TICK_MS must be > 0"),
            (self.store.pool_size == 0, "POOL_SIZE must be > 0"),
            (self.audit.max_bytes == 0, "AUDIT_MAX_BYTES must be > 0"),
        ];
        if let Some((_, msg)) = checks.iter().find(|(bad, _)| *bad) {
            return Err(CoreError::InvalidConfig(msg.to_string()));
        }
        // RateLimit fields are public, so hand-built limits are re-checked here.
        let limits = std::iter::once(&self.admission.default_limit)
            .chain(self.admission.source_limits.values());
        for limit in limits {
            RateLimit::new(limit.max_requests, limit.window)?;
        }
        Ok(())
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  dedup:     capacity={}, lookup_capacity={}, lookup_ttl={:?}",
            self.dedup.capacity, self.dedup.lookup_capacity, self.dedup.lookup_ttl);
        tracing::info!("  batch:     size={}, interval={:?}, tick={:?}",
            self.batch.size, self.batch.interval, self.batch.tick);
        tracing::info!("  store:     path={}, pool_size={}, checkout_timeout={:?}",
            self.store.database_path.display(), self.store.pool_size, self.store.checkout_timeout);
        tracing::info!("  admission: default={}, {} source overrides",
            self.admission.default_limit, self.admission.source_limits.len());
        tracing::info!("  audit:     path={}, max_bytes={}, backups={}",
            self.audit.log_path.display(), self.audit.max_bytes, self.audit.backup_count);
    }
}

// ── Dedup / lookup caches ─────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub capacity: usize,
    pub lookup_capacity: usize,
    pub lookup_ttl: Duration,
}

impl DedupConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, CoreError> {
        let d = Self::default();
        Ok(Self {
            capacity: profiled_num(lookup, p, "DEDUP_CACHE_CAPACITY", d.capacity)?,
            lookup_capacity: profiled_num(lookup, p, "LOOKUP_CACHE_CAPACITY", d.lookup_capacity)?,
            lookup_ttl: Duration::from_secs(profiled_num(
                lookup,
                p,
                "LOOKUP_CACHE_TTL_SECS",
                d.lookup_ttl.as_secs(),
            )?),
        })
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            lookup_capacity: 1_000,
            lookup_ttl: Duration::from_secs(300),
        }
    }
}

// ── Batching ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush once this many items are pending.
    pub size: usize,
    /// Flush once this long has passed since the previous flush.
    pub interval: Duration,
    /// Wake interval of the background flush loop.
    pub tick: Duration,
}

impl BatchConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, CoreError> {
        let d = Self::default();
        Ok(Self {
            size: profiled_num(lookup, p, "BATCH_SIZE", d.size)?,
            interval: Duration::from_millis(profiled_num(
                lookup,
                p,
                "BATCH_INTERVAL_MS",
                d.interval.as_millis() as u64,
            )?),
            tick: Duration::from_millis(profiled_num(
                lookup,
                p,
                "FLUSH_TICK_MS",
                d.tick.as_millis() as u64,
            )?),
        })
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 50,
            interval: Duration::from_secs(5),
            tick: Duration::from_millis(500),
        }
    }
}

// ── Store / pool ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: PathBuf,
    pub pool_size: usize,
    pub checkout_timeout: Duration,
}

impl StoreConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, CoreError> {
        let d = Self::default();
        Ok(Self {
            database_path: PathBuf::from(profiled_or(lookup, p, "DATABASE_PATH", "data/jobs.db")),
            pool_size: profiled_num(lookup, p, "POOL_SIZE", d.pool_size)?,
            checkout_timeout: Duration::from_millis(profiled_num(
                lookup,
                p,
                "POOL_CHECKOUT_TIMEOUT_MS",
                d.checkout_timeout.as_millis() as u64,
            )?),
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/jobs.db"),
            pool_size: 10,
            checkout_timeout: Duration::from_secs(2),
        }
    }
}

// ── Admission control ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Limit for sources without an explicit entry.
    pub default_limit: RateLimit,
    /// Keyed by lowercase source name.
    pub source_limits: BTreeMap<String, RateLimit>,
}

impl AdmissionConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, CoreError> {
        let mut config = Self::default();
        if let Some(raw) = profiled_opt(lookup, p, "DEFAULT_RATE_LIMIT") {
            config.default_limit = raw.parse()?;
        }
        if let Some(raw) = profiled_opt(lookup, p, "RATE_LIMITS") {
            config.source_limits.extend(parse_source_limits(&raw)?);
        }
        Ok(config)
    }

    /// Limit configured for a source, falling back to the default.
    pub fn limit_for(&self, source: &str) -> RateLimit {
        self.source_limits
            .get(&source.to_lowercase())
            .copied()
            .unwrap_or(self.default_limit)
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let source_limits = DEFAULT_SOURCE_LIMITS
            .iter()
            .map(|(source, max, secs)| {
                let limit = RateLimit {
                    max_requests: *max,
                    window: Duration::from_secs(*secs),
                };
                (source.to_string(), limit)
            })
            .collect();
        Self {
            default_limit: RateLimit {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
            source_limits,
        }
    }
}

// ── Audit log ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub log_path: PathBuf,
    /// Rotate once the live file would grow past this size.
    pub max_bytes: u64,
    /// Rotated backups kept as `<name>.1` .. `<name>.<n>`.
    pub backup_count: usize,
}

impl AuditConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, CoreError> {
        let d = Self::default();
        Ok(Self {
            log_path: PathBuf::from(profiled_or(lookup, p, "AUDIT_LOG_PATH", "data/audit.log")),
            max_bytes: profiled_num(lookup, p, "AUDIT_MAX_BYTES", d.max_bytes)?,
            backup_count: profiled_num(lookup, p, "AUDIT_BACKUP_COUNT", d.backup_count)?,
        })
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("data/audit.log"),
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
        }
    }
}
