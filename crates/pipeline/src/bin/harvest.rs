//! harvest: drive the ingestion pipeline from the command line.
//!
//! `ingest` replays a JSONL dump of scraped records through admission,
//! dedup and persistence with one worker per source. The other subcommands
//! inspect the job table and the audit log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use harvest_audit::{EventFilter, EventKind};
use harvest_core::{load_dotenv, JobRecord, PipelineConfig};
use harvest_pipeline::{IngestOutcome, Pipeline};

// ── CLI ─────────────────────────────────────────────────────────────

/// Job record ingestion pipeline.
#[derive(Parser, Debug)]
#[command(name = "harvest", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest newline-delimited JobRecord JSON, one worker per source.
    Ingest {
        file: PathBuf,

        /// Records fetched per admission grant.
        #[arg(long, env = "HARVEST_PAGE_SIZE", default_value_t = 25)]
        page_size: usize,

        /// Seconds a worker waits for admission before skipping a page.
        #[arg(long, env = "HARVEST_ADMISSION_TIMEOUT", default_value_t = 60)]
        admission_timeout: u64,
    },

    /// Print job table statistics as JSON.
    Stats,

    /// Print recent audit events as JSON lines, newest first.
    Events {
        #[arg(long, default_value_t = 60)]
        window_mins: u64,

        /// Event kind, e.g. admission_denied (alias: blocked).
        #[arg(long)]
        kind: Option<String>,

        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        tool: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Run anomaly detection over the audit log.
    Anomalies {
        #[arg(long, default_value_t = 60)]
        window_mins: u64,
    },

    /// Compact the job table.
    Optimize,
}

// ── ingest ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
struct SourceSummary {
    accepted: usize,
    duplicates: usize,
    rejected: usize,
    skipped_pages: usize,
}

fn read_records(path: &Path) -> Result<BTreeMap<String, Vec<JobRecord>>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut by_source: BTreeMap<String, Vec<JobRecord>> = BTreeMap::new();
    let mut malformed = 0usize;
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match JobRecord::from_json_line(line) {
            Ok(record) => by_source
                .entry(record.source.trim().to_lowercase())
                .or_default()
                .push(record),
            Err(e) => {
                malformed += 1;
                warn!(line = lineno + 1, error = %e, "skipping malformed record");
            }
        }
    }
    info!(
        sources = by_source.len(),
        records = by_source.values().map(Vec::len).sum::<usize>(),
        malformed,
        "records loaded"
    );
    Ok(by_source)
}

async fn run_source(
    pipeline: Arc<Pipeline>,
    source: String,
    records: Vec<JobRecord>,
    page_size: usize,
    timeout: Duration,
) -> SourceSummary {
    let mut summary = SourceSummary::default();
    for page in records.chunks(page_size.max(1)) {
        if let Err(e) = pipeline.acquire(&source, timeout).await {
            warn!(source = %source, error = %e, "admission not granted, skipping page");
            summary.skipped_pages += 1;
            continue;
        }
        for record in page {
            match pipeline.ingest(record.clone()) {
                IngestOutcome::Accepted(_) => summary.accepted += 1,
                IngestOutcome::Duplicate(_) => summary.duplicates += 1,
                IngestOutcome::Rejected => summary.rejected += 1,
            }
        }
    }
    info!(
        source = %source,
        accepted = summary.accepted,
        duplicates = summary.duplicates,
        skipped_pages = summary.skipped_pages,
        "source worker finished"
    );
    summary
}

async fn ingest(pipeline: Arc<Pipeline>, file: PathBuf, page_size: usize, timeout: Duration) -> Result<()> {
    let by_source = read_records(&file)?;
    pipeline.warm_dedup_cache(pipeline.config().dedup.capacity).await?;

    let workers: Vec<_> = by_source
        .into_iter()
        .map(|(source, records)| {
            let pipeline = Arc::clone(&pipeline);
            let name = source.clone();
            (name, tokio::spawn(run_source(pipeline, source, records, page_size, timeout)))
        })
        .collect();

    let mut summaries = BTreeMap::new();
    for (source, handle) in workers {
        let summary = handle
            .await
            .with_context(|| format!("worker for {source} panicked"))?;
        summaries.insert(source, summary);
    }

    let final_flush = pipeline.shutdown().await?;
    info!(items = final_flush.items, "final flush complete");

    let report = serde_json::json!({
        "sources": summaries,
        "pipeline": pipeline.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    load_dotenv();
    let config = PipelineConfig::from_env().context("invalid configuration")?;
    config.log_summary();

    let pipeline = Arc::new(
        Pipeline::from_config(config)
            .await
            .context("failed to start pipeline")?,
    );

    match cli.command {
        Command::Ingest {
            file,
            page_size,
            admission_timeout,
        } => {
            ingest(
                Arc::clone(&pipeline),
                file,
                page_size,
                Duration::from_secs(admission_timeout),
            )
            .await?;
        }
        Command::Stats => {
            let board = pipeline.job_board_stats().await?;
            println!("{}", serde_json::to_string_pretty(&board)?);
        }
        Command::Events {
            window_mins,
            kind,
            source,
            tool,
            limit,
        } => {
            let kind = kind
                .map(|k| k.parse::<EventKind>())
                .transpose()?;
            let filter = EventFilter {
                kind,
                source,
                tool,
                limit: Some(limit),
            };
            for event in pipeline.recent_events(Duration::from_secs(window_mins * 60), &filter)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Command::Anomalies { window_mins } => {
            let findings = pipeline.detect_anomalies(Duration::from_secs(window_mins * 60))?;
            if findings.is_empty() {
                info!(window_mins, "no anomalies found");
            }
            println!("{}", serde_json::to_string_pretty(&findings)?);
        }
        Command::Optimize => {
            pipeline.optimize().await?;
        }
    }

    // Second call after `ingest` is a no-op.
    pipeline.shutdown().await?;
    Ok(())
}
