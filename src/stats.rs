//! Database statistics and health overview.
//!
//! Provides a quick summary of what's loaded: postcode and outcode counts,
//! database size, and the most recent ingestion runs. Used by `pcl stats`
//! to give confidence that quarterly updates are landing.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// How many ingestion runs `pcl stats` lists.
const RECENT_RUNS: i64 = 5;

/// One row of the `ingest_runs` ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub id: i64,
    pub started_at: i64,
    /// `None` while a run is in progress or if it rolled back.
    pub finished_at: Option<i64>,
    pub datum: String,
    pub files: i64,
    pub rows: i64,
    pub skipped: i64,
    pub pruned: i64,
}

/// Summary numbers for a postcode database.
#[derive(Debug, Clone, PartialEq)]
pub struct DbStats {
    pub postcodes: i64,
    pub outcodes: i64,
    pub recent_runs: Vec<RunStats>,
}

/// Collect counts and the latest runs, newest first.
pub async fn collect_stats(pool: &SqlitePool) -> Result<DbStats> {
    let postcodes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM postcodes")
        .fetch_one(pool)
        .await?;

    let outcodes: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT outcode) FROM postcodes")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT id, started_at, finished_at, datum, files, rows, skipped, pruned
        FROM ingest_runs
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(RECENT_RUNS)
    .fetch_all(pool)
    .await?;

    let recent_runs = rows
        .iter()
        .map(|row| RunStats {
            id: row.get("id"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            datum: row.get("datum"),
            files: row.get("files"),
            rows: row.get("rows"),
            skipped: row.get("skipped"),
            pruned: row.get("pruned"),
        })
        .collect();

    Ok(DbStats {
        postcodes,
        outcodes,
        recent_runs,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Postcode Locator — Database Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Postcodes:   {}", stats.postcodes);
    println!("  Outcodes:    {}", stats.outcodes);

    if !stats.recent_runs.is_empty() {
        println!();
        println!("  Recent updates:");
        println!(
            "  {:>4}  {:<16} {:<16} {:>6} {:>10} {:>8} {:>8}",
            "RUN", "FINISHED", "DATUM", "FILES", "ROWS", "SKIPPED", "PRUNED"
        );
        println!("  {}", "-".repeat(76));

        for run in &stats.recent_runs {
            let finished = match run.finished_at {
                Some(ts) => format_ts_relative(ts),
                None => "incomplete".to_string(),
            };
            println!(
                "  {:>4}  {:<16} {:<16} {:>6} {:>10} {:>8} {:>8}",
                run.id, finished, run.datum, run.files, run.rows, run.skipped, run.pruned
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 days ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts(ts)
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn old_timestamps_fall_back_to_dates() {
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
    }

    #[tokio::test]
    async fn counts_outcodes_and_lists_newest_runs_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("pcl.sqlite"))
            .await
            .unwrap();
        migrate(&pool).await.unwrap();

        for (code, trimmed, outcode, incode) in [
            ("SW1A 1AA", "SW1A1AA", "SW1A", "1AA"),
            ("SW1A 2AA", "SW1A2AA", "SW1A", "2AA"),
            ("EH1 1YZ", "EH11YZ", "EH1", "1YZ"),
        ] {
            sqlx::query(
                "INSERT INTO postcodes (postcode, postcode_trimmed, outcode, incode, latitude, longitude, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, 51.5, -0.1, 0, 0)",
            )
            .bind(code)
            .bind(trimmed)
            .bind(outcode)
            .bind(incode)
            .execute(&pool)
            .await
            .unwrap();
        }
        for i in 0..7 {
            sqlx::query("INSERT INTO ingest_runs (started_at, finished_at, datum) VALUES (?, ?, 'legacy')")
                .bind(i)
                .bind(i + 1)
                .execute(&pool)
                .await
                .unwrap();
        }

        let stats = collect_stats(&pool).await.unwrap();
        assert_eq!(stats.postcodes, 3);
        assert_eq!(stats.outcodes, 2);
        assert_eq!(stats.recent_runs.len(), 5);
        assert_eq!(stats.recent_runs[0].id, 7);
        assert_eq!(stats.recent_runs[0].finished_at, Some(7));
        assert_eq!(stats.recent_runs[4].id, 3);
    }
}
