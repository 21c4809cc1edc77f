use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use harvest_core::Fingerprint;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::{
    BatchItem, JobBoardStats, RecordStore, SourceStats, StoreConnection, StoredJob, UpsertOutcome,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job_records (
        fingerprint    TEXT PRIMARY KEY,
        strategy       TEXT NOT NULL,
        external_id    TEXT,
        url            TEXT,
        source         TEXT NOT NULL,
        title          TEXT,
        organization   TEXT,
        description    TEXT,
        score          REAL,
        attributes     TEXT,
        observed_count INTEGER NOT NULL DEFAULT 1,
        first_seen     TEXT NOT NULL,
        last_seen      TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_job_records_source ON job_records (source)",
    "CREATE INDEX IF NOT EXISTS idx_job_records_last_seen ON job_records (last_seen)",
];

const UPSERT: &str = r#"
    INSERT INTO job_records (
        fingerprint, strategy, external_id, url, source, title, organization,
        description, score, attributes, observed_count, first_seen, last_seen
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
    ON CONFLICT (fingerprint) DO UPDATE SET
        observed_count = job_records.observed_count + 1,
        last_seen      = excluded.last_seen,
        external_id    = COALESCE(excluded.external_id, job_records.external_id),
        url            = COALESCE(excluded.url, job_records.url),
        title          = COALESCE(excluded.title, job_records.title),
        organization   = COALESCE(excluded.organization, job_records.organization),
        description    = COALESCE(excluded.description, job_records.description),
        score          = COALESCE(excluded.score, job_records.score),
        attributes     = COALESCE(excluded.attributes, job_records.attributes)
    RETURNING observed_count
"#;

/// SQLite-backed job table. Each pooled slot is its own connection; WAL mode
/// plus a busy timeout lets concurrent flushes take turns writing.
pub struct SqliteStore {
    path: PathBuf,
    options: SqliteConnectOptions,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and ensure the schema exists.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let mut conn = options.connect().await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&mut conn).await?;
        }
        conn.close().await?;

        info!(path = %path.display(), "job record store ready");
        Ok(Self {
            path: path.to_path_buf(),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn connect(&self) -> Result<Box<dyn StoreConnection>, StoreError> {
        let conn = self.options.connect().await?;
        debug!(path = %self.path.display(), "opened store connection");
        Ok(Box::new(SqliteSlot { conn }))
    }
}

struct SqliteSlot {
    conn: SqliteConnection,
}

/// Blank strings are stored as NULL so they never overwrite real values.
fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[async_trait]
impl StoreConnection for SqliteSlot {
    async fn begin(&mut self) -> Result<(), StoreError> {
        sqlx::query("BEGIN IMMEDIATE").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn upsert(&mut self, item: &BatchItem) -> Result<UpsertOutcome, StoreError> {
        let record = &item.record;
        let attributes = if record.attributes.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&record.attributes)?)
        };
        let seen = item.enqueued_at_text();

        let observed_count: i64 = sqlx::query_scalar(UPSERT)
            .bind(item.fingerprint.as_str())
            .bind(item.strategy.as_str())
            .bind(record.external_id())
            .bind(record.url())
            .bind(record.source.trim())
            .bind(non_empty(&record.title))
            .bind(non_empty(&record.organization))
            .bind(non_empty(&record.description))
            .bind(item.score)
            .bind(attributes)
            .bind(seen.as_str())
            .bind(seen.as_str())
            .fetch_one(&mut self.conn)
            .await?;

        Ok(if observed_count <= 1 {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated { observed_count }
        })
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn optimize(&mut self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA optimize").execute(&mut self.conn).await?;
        sqlx::query("VACUUM").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn find(&mut self, fingerprint: &Fingerprint) -> Result<Option<StoredJob>, StoreError> {
        let row: Option<(
            String,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<String>,
            Option<f64>,
            i64,
            String,
            String,
        )> = sqlx::query_as(
            "SELECT fingerprint, strategy, source, title, organization, url, score, \
                    observed_count, first_seen, last_seen \
             FROM job_records WHERE fingerprint = ?",
        )
        .bind(fingerprint.as_str())
        .fetch_optional(&mut self.conn)
        .await?;

        Ok(row.map(
            |(fingerprint, strategy, source, title, organization, url, score, observed_count, first_seen, last_seen)| {
                StoredJob {
                    fingerprint,
                    strategy,
                    source,
                    title,
                    organization,
                    url,
                    score,
                    observed_count,
                    first_seen,
                    last_seen,
                }
            },
        ))
    }

    async fn job_board_stats(&mut self) -> Result<JobBoardStats, StoreError> {
        let rows: Vec<(String, i64, i64, Option<String>)> = sqlx::query_as(
            "SELECT source, COUNT(*), SUM(observed_count), MAX(last_seen) \
             FROM job_records GROUP BY source ORDER BY source",
        )
        .fetch_all(&mut self.conn)
        .await?;

        let sources = rows
            .into_iter()
            .map(|(source, records, observations, last_seen)| SourceStats {
                source,
                records,
                observations,
                last_seen,
            })
            .collect();
        Ok(JobBoardStats::from_sources(sources))
    }

    async fn recent_fingerprints(&mut self, limit: usize) -> Result<Vec<Fingerprint>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT fingerprint FROM job_records ORDER BY last_seen DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&mut self.conn)
        .await?;
        Ok(rows.into_iter().map(Fingerprint::from_hex).collect())
    }
}
