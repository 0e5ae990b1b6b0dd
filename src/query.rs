//! One-shot postcode queries from the command line.
//!
//! `pcl lookup`, `pcl radius` and `pcl distance` open the database, run a
//! single query through [`SqliteStore`] and print pretty JSON to stdout in
//! the same shapes the HTTP service returns as `data`. An unknown postcode
//! prints an error to stderr and exits with status 1; an empty radius
//! search prints `[]`.

use anyhow::Result;
use serde::Serialize;

use postcode_locator_core::postcode::normalize;
use postcode_locator_core::store::PostcodeStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Distance between two postcodes, as printed by `pcl distance`.
#[derive(Debug, Clone, Serialize)]
pub struct DistanceResponse {
    pub from: String,
    pub to: String,
    /// Great-circle meters, rounded to two decimal places.
    pub distance: f64,
    pub unit: &'static str,
}

/// Core distance query returning structured data (used by the CLI).
pub async fn distance_between(
    store: &dyn PostcodeStore,
    from: &str,
    to: &str,
) -> Result<Option<DistanceResponse>> {
    let Some(meters) = store.distance(from, to).await? else {
        return Ok(None);
    };
    let canonical = |raw: &str| {
        normalize(raw)
            .map(|p| p.canonical)
            .unwrap_or_else(|| raw.to_string())
    };
    Ok(Some(DistanceResponse {
        from: canonical(from),
        to: canonical(to),
        distance: (meters * 100.0).round() / 100.0,
        unit: "meters",
    }))
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    Ok(SqliteStore::new(db::connect(config).await?))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// CLI entry point for `pcl lookup`.
pub async fn run_lookup(config: &Config, postcode: &str) -> Result<()> {
    let store = open_store(config).await?;
    let found = store.lookup(postcode).await?;
    store.pool().close().await;

    match found {
        Some(view) => print_json(&view),
        None => {
            eprintln!("Error: postcode not found: {}", postcode);
            std::process::exit(1);
        }
    }
}

/// CLI entry point for `pcl radius`.
pub async fn run_radius(config: &Config, postcode: &str, radius_m: u32) -> Result<()> {
    let store = open_store(config).await?;
    let hits = store.radius_search(postcode, f64::from(radius_m)).await?;
    store.pool().close().await;

    print_json(&hits)
}

/// CLI entry point for `pcl distance`.
pub async fn run_distance(config: &Config, from: &str, to: &str) -> Result<()> {
    let store = open_store(config).await?;
    let response = distance_between(&store, from, to).await?;
    store.pool().close().await;

    match response {
        Some(r) => print_json(&r),
        None => {
            eprintln!("Error: one or both postcodes not found: {}, {}", from, to);
            std::process::exit(1);
        }
    }
}
