//! SQLite-backed [`PostcodeStore`] implementation.
//!
//! Point lookups go through the unique `postcode` column. Radius queries
//! read candidate ids from the `postcodes_rtree` R*Tree (kept in step with
//! latitude/longitude by triggers), then apply the exact great-circle
//! filter in Rust.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use postcode_locator_core::distance::SearchEnvelope;
use postcode_locator_core::geodesy::LatLon;
use postcode_locator_core::models::{AdminAreas, PostcodeRecord};
use postcode_locator_core::postcode::Postcode;
use postcode_locator_core::store::{filter_within, PostcodeStore};

/// Columns bound per row by [`upsert_batch`].
pub const UPSERT_COLUMNS: usize = 23;

/// Largest batch that keeps one upsert under SQLite's bound-parameter limit.
pub const MAX_BATCH_SIZE: usize = 32_766 / UPSERT_COLUMNS;

const RECORD_COLUMNS: &str = "p.postcode, p.postcode_trimmed, p.outcode, p.incode, \
     p.latitude, p.longitude, p.quality, p.country, p.nhs_ha, p.admin_county, \
     p.admin_district, p.admin_ward, p.constituency, p.european_electoral_region, \
     p.primary_care_trust, p.region, p.parish, p.lsoa, p.msoa, p.nuts, \
     p.created_at, p.updated_at";

/// SQLite implementation of the [`PostcodeStore`] trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn record_from_row(row: &SqliteRow) -> Result<PostcodeRecord, sqlx::Error> {
    Ok(PostcodeRecord {
        postcode: Postcode {
            canonical: row.try_get("postcode")?,
            compact: row.try_get("postcode_trimmed")?,
            outward: row.try_get("outcode")?,
            inward: row.try_get("incode")?,
        },
        position: LatLon::new(row.try_get("latitude")?, row.try_get("longitude")?),
        quality: row.try_get("quality")?,
        admin: AdminAreas {
            country: row.try_get("country")?,
            nhs_ha: row.try_get("nhs_ha")?,
            admin_county: row.try_get("admin_county")?,
            admin_district: row.try_get("admin_district")?,
            admin_ward: row.try_get("admin_ward")?,
            constituency: row.try_get("constituency")?,
            european_electoral_region: row.try_get("european_electoral_region")?,
            primary_care_trust: row.try_get("primary_care_trust")?,
            region: row.try_get("region")?,
            parish: row.try_get("parish")?,
            lsoa: row.try_get("lsoa")?,
            msoa: row.try_get("msoa")?,
            nuts: row.try_get("nuts")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PostcodeStore for SqliteStore {
    async fn find(&self, postcode: &Postcode) -> Result<Option<PostcodeRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM postcodes p WHERE p.postcode = ?");
        let row = sqlx::query(&sql)
            .bind(&postcode.canonical)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(record_from_row).transpose()?)
    }

    async fn within(&self, center: LatLon, radius_m: f64) -> Result<Vec<(PostcodeRecord, f64)>> {
        let envelope = SearchEnvelope::around(center, radius_m);
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM postcodes_rtree r JOIN postcodes p ON p.id = r.id \
             WHERE r.max_lon >= ? AND r.min_lon <= ? AND r.max_lat >= ? AND r.min_lat <= ?"
        );
        let rows = sqlx::query(&sql)
            .bind(envelope.min_lon)
            .bind(envelope.max_lon)
            .bind(envelope.min_lat)
            .bind(envelope.max_lat)
            .fetch_all(&self.pool)
            .await?;

        let candidates = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(candidates = candidates.len(), radius_m, "radius prefilter");

        Ok(filter_within(candidates, center, radius_m))
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM postcodes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Insert or overwrite `records` keyed on canonical postcode in a single
/// multi-row statement. `created_at` survives overwrites.
///
/// Callers pass a connection borrowed from an open transaction.
pub async fn upsert_batch(
    conn: &mut SqliteConnection,
    run_id: i64,
    now: i64,
    records: &[PostcodeRecord],
) -> Result<u64, sqlx::Error> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "INSERT INTO postcodes (postcode, postcode_trimmed, outcode, incode, latitude, \
         longitude, quality, country, nhs_ha, admin_county, admin_district, admin_ward, \
         constituency, european_electoral_region, primary_care_trust, region, parish, \
         lsoa, msoa, nuts, ingest_run, created_at, updated_at) ",
    );
    qb.push_values(records, |mut b, r| {
        let admin = &r.admin;
        b.push_bind(r.postcode.canonical.as_str())
            .push_bind(r.postcode.compact.as_str())
            .push_bind(r.postcode.outward.as_str())
            .push_bind(r.postcode.inward.as_str())
            .push_bind(r.position.latitude)
            .push_bind(r.position.longitude)
            .push_bind(r.quality)
            .push_bind(admin.country.as_deref())
            .push_bind(admin.nhs_ha.as_deref())
            .push_bind(admin.admin_county.as_deref())
            .push_bind(admin.admin_district.as_deref())
            .push_bind(admin.admin_ward.as_deref())
            .push_bind(admin.constituency.as_deref())
            .push_bind(admin.european_electoral_region.as_deref())
            .push_bind(admin.primary_care_trust.as_deref())
            .push_bind(admin.region.as_deref())
            .push_bind(admin.parish.as_deref())
            .push_bind(admin.lsoa.as_deref())
            .push_bind(admin.msoa.as_deref())
            .push_bind(admin.nuts.as_deref())
            .push_bind(run_id)
            .push_bind(now)
            .push_bind(now);
    });
    qb.push(
        " ON CONFLICT(postcode) DO UPDATE SET \
         postcode_trimmed = excluded.postcode_trimmed, \
         outcode = excluded.outcode, \
         incode = excluded.incode, \
         latitude = excluded.latitude, \
         longitude = excluded.longitude, \
         quality = excluded.quality, \
         country = excluded.country, \
         nhs_ha = excluded.nhs_ha, \
         admin_county = excluded.admin_county, \
         admin_district = excluded.admin_district, \
         admin_ward = excluded.admin_ward, \
         constituency = excluded.constituency, \
         european_electoral_region = excluded.european_electoral_region, \
         primary_care_trust = excluded.primary_care_trust, \
         region = excluded.region, \
         parish = excluded.parish, \
         lsoa = excluded.lsoa, \
         msoa = excluded.msoa, \
         nuts = excluded.nuts, \
         ingest_run = excluded.ingest_run, \
         updated_at = excluded.updated_at",
    );

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}
