//! Ingestion pipeline orchestration.
//!
//! Rebuilds the postcode table from the Code-Point style archive:
//! fetch → extract → stream each CSV → convert grid references → batch
//! upsert. Every file is loaded inside one SQLite transaction, so a failed
//! run leaves the previously committed dataset untouched.
//!
//! Rows that cannot be used (bad postcode, non-numeric coordinates, failed
//! conversion) are skipped and logged. Anything else (I/O, CSV framing,
//! database) aborts the run.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use postcode_locator_core::geodesy::{GridConverter, GridRef};
use postcode_locator_core::models::{AdminAreas, PostcodeRecord};
use postcode_locator_core::postcode::normalize;

use crate::archive::{self, ArchiveSource, HttpArchiveSource, LocalArchiveSource};
use crate::config::{Config, IngestConfig};
use crate::db;
use crate::error::{IngestError, RowError};
use crate::migrate;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};
use crate::schedule::RunLock;
use crate::sqlite_store::upsert_batch;

const ARCHIVE_FILE: &str = "codepo.zip";
const EXTRACT_DIR: &str = "extracted";

/// Source column positions.
mod col {
    pub const POSTCODE: usize = 0;
    pub const QUALITY: usize = 1;
    pub const EASTING: usize = 2;
    pub const NORTHING: usize = 3;
    pub const COUNTRY: usize = 4;
    pub const HEALTH_AUTHORITY: usize = 5;
    pub const COUNTY: usize = 6;
    pub const DISTRICT: usize = 7;
    pub const WARD: usize = 8;
}

const REQUIRED_COLUMNS: usize = col::NORTHING + 1;

/// Outcome of a committed ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    pub run_id: i64,
    pub files: usize,
    /// Rows converted and upserted.
    pub rows: u64,
    /// Rows skipped as unusable.
    pub skipped: u64,
    /// Records deleted because the run did not contain them.
    pub pruned: u64,
    pub duration: Duration,
}

/// Build a record from one source row.
pub fn parse_row(
    row: &csv::StringRecord,
    converter: &GridConverter,
) -> Result<PostcodeRecord, RowError> {
    if row.len() < REQUIRED_COLUMNS {
        return Err(RowError::TooFewColumns {
            expected: REQUIRED_COLUMNS,
            found: row.len(),
        });
    }
    let field = |i: usize| row.get(i).map(str::trim).unwrap_or("");
    let optional = |i: usize| Some(field(i)).filter(|v| !v.is_empty()).map(str::to_string);

    let raw_code = field(col::POSTCODE);
    let postcode =
        normalize(raw_code).ok_or_else(|| RowError::InvalidPostcode(raw_code.to_string()))?;

    let quality = match field(col::QUALITY) {
        "" => 0,
        v => v.parse::<i64>().map_err(|_| RowError::NotNumeric {
            column: "quality",
            value: v.to_string(),
        })?,
    };
    let easting = parse_coordinate(field(col::EASTING), "easting")?;
    let northing = parse_coordinate(field(col::NORTHING), "northing")?;

    let position = converter.to_wgs84(GridRef::new(easting, northing))?;
    if !position.is_valid() {
        return Err(RowError::OutOfRange(position));
    }

    Ok(PostcodeRecord {
        quality,
        admin: AdminAreas {
            country: optional(col::COUNTRY),
            nhs_ha: optional(col::HEALTH_AUTHORITY),
            admin_county: optional(col::COUNTY),
            admin_district: optional(col::DISTRICT),
            admin_ward: optional(col::WARD),
            ..AdminAreas::default()
        },
        ..PostcodeRecord::new(postcode, position)
    })
}

fn parse_coordinate(value: &str, column: &'static str) -> Result<f64, RowError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RowError::NotNumeric {
            column,
            value: value.to_string(),
        })
}

/// Fetch, extract and load the archive from `source` into `pool`.
///
/// The archive and extracted files are removed after a successful commit
/// and kept for inspection when the run fails.
pub async fn ingest(
    config: &IngestConfig,
    pool: &SqlitePool,
    source: &dyn ArchiveSource,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestSummary, IngestError> {
    let started = Instant::now();
    std::fs::create_dir_all(&config.work_dir).map_err(|e| IngestError::io(&config.work_dir, e))?;
    let archive_path = config.work_dir.join(ARCHIVE_FILE);
    let extract_dir = config.work_dir.join(EXTRACT_DIR);

    progress.report(IngestProgressEvent::Fetching {
        source: source.describe(),
    });
    let bytes = source.fetch(&archive_path).await?;
    info!(source = %source.describe(), bytes, "archive fetched");

    let files = archive::extract(&archive_path, &extract_dir, &config.file_patterns)?;
    progress.report(IngestProgressEvent::Extracted { files: files.len() });
    info!(files = files.len(), "archive extracted");

    let mut summary = match load_files(config, pool, &files, progress).await {
        Ok(summary) => summary,
        Err(err) => {
            warn!(
                error = %err,
                work_dir = %config.work_dir.display(),
                "ingestion rolled back; intermediate files kept"
            );
            return Err(err);
        }
    };

    cleanup(&archive_path, &extract_dir);
    summary.duration = started.elapsed();
    Ok(summary)
}

async fn load_files(
    config: &IngestConfig,
    pool: &SqlitePool,
    files: &[PathBuf],
    progress: &dyn IngestProgressReporter,
) -> Result<IngestSummary, IngestError> {
    let converter = GridConverter::from(config.datum);
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    let run_id: i64 =
        sqlx::query_scalar("INSERT INTO ingest_runs (started_at, datum) VALUES (?, ?) RETURNING id")
            .bind(now)
            .bind(config.datum.as_str())
            .fetch_one(&mut *tx)
            .await?;

    let mut batch: Vec<PostcodeRecord> = Vec::with_capacity(config.batch_size);
    let (mut rows, mut skipped) = (0u64, 0u64);
    let total = files.len();

    for (i, path) in files.iter().enumerate() {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        progress.report(IngestProgressEvent::FileStarted {
            index: i + 1,
            total,
            file: file_name.clone(),
        });

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|source| IngestError::Csv {
                path: path.clone(),
                source,
            })?;

        let mut record = csv::StringRecord::new();
        let (mut file_rows, mut file_skipped) = (0u64, 0u64);
        loop {
            match reader.read_record(&mut record) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) if matches!(err.kind(), csv::ErrorKind::Utf8 { .. }) => {
                    warn!(file = %file_name, error = %err, "skipping row");
                    file_skipped += 1;
                    continue;
                }
                Err(source) => {
                    return Err(IngestError::Csv {
                        path: path.clone(),
                        source,
                    })
                }
            }

            match parse_row(&record, &converter) {
                Ok(parsed) => {
                    batch.push(parsed);
                    file_rows += 1;
                    if batch.len() >= config.batch_size {
                        upsert_batch(&mut *tx, run_id, now, &batch).await?;
                        batch.clear();
                    }
                }
                Err(reason) => {
                    let line = record.position().map(|p| p.line()).unwrap_or_default();
                    warn!(file = %file_name, line, %reason, "skipping row");
                    file_skipped += 1;
                }
            }
        }

        rows += file_rows;
        skipped += file_skipped;
        debug!(file = %file_name, rows = file_rows, skipped = file_skipped, "file loaded");
        progress.report(IngestProgressEvent::FileDone {
            index: i + 1,
            total,
            rows: file_rows,
            skipped: file_skipped,
        });
    }

    upsert_batch(&mut *tx, run_id, now, &batch).await?;

    let pruned = if config.prune_missing {
        sqlx::query("DELETE FROM postcodes WHERE ingest_run IS NOT ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
    } else {
        0
    };

    sqlx::query(
        "UPDATE ingest_runs SET finished_at = ?, files = ?, rows = ?, skipped = ?, pruned = ? WHERE id = ?",
    )
    .bind(chrono::Utc::now().timestamp())
    .bind(total as i64)
    .bind(rows as i64)
    .bind(skipped as i64)
    .bind(pruned as i64)
    .bind(run_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(run_id, rows, skipped, pruned, "ingestion committed");

    Ok(IngestSummary {
        run_id,
        files: total,
        rows,
        skipped,
        pruned,
        duration: Duration::ZERO,
    })
}

fn cleanup(archive_path: &Path, extract_dir: &Path) {
    if let Err(e) = std::fs::remove_file(archive_path) {
        warn!(path = %archive_path.display(), error = %e, "failed to remove archive");
    }
    if let Err(e) = std::fs::remove_dir_all(extract_dir) {
        warn!(path = %extract_dir.display(), error = %e, "failed to remove extracted files");
    }
}

/// CLI entry point for `pcl update`.
///
/// With `scheduled`, exits quietly unless today is a configured update
/// day. Holds the run lock for the duration of the run.
pub async fn run_update(
    config: &Config,
    archive: Option<PathBuf>,
    scheduled: bool,
    mode: ProgressMode,
) -> Result<()> {
    if scheduled {
        let today = chrono::Local::now().date_naive();
        if !config.schedule.is_due(today) {
            info!(%today, "not a scheduled update day; nothing to do");
            println!("update skipped: {} is not a scheduled update day", today);
            return Ok(());
        }
    }

    let _lock = RunLock::acquire(&config.lock_path())?;
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;

    let source: Box<dyn ArchiveSource> = match archive {
        Some(path) => Box::new(LocalArchiveSource::new(path)),
        None => Box::new(HttpArchiveSource::from_config(&config.ingest)?),
    };
    let reporter = mode.reporter();

    let summary = ingest(&config.ingest, &pool, source.as_ref(), reporter.as_ref())
        .await
        .with_context(|| format!("update from {} failed", source.describe()))?;

    println!("update");
    println!("  run: {}", summary.run_id);
    println!("  files: {}", summary.files);
    println!("  upserted postcodes: {}", summary.rows);
    println!("  skipped rows: {}", summary.skipped);
    if config.ingest.prune_missing {
        println!("  pruned postcodes: {}", summary.pruned);
    }
    println!("  datum: {}", config.ingest.datum.as_str());
    println!("  elapsed: {:.1}s", summary.duration.as_secs_f64());
    println!("ok");

    pool.close().await;
    Ok(())
}
