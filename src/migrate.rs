use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the postcode schema on an open pool. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS postcodes (
            id INTEGER PRIMARY KEY,
            postcode TEXT NOT NULL UNIQUE,
            postcode_trimmed TEXT NOT NULL,
            outcode TEXT NOT NULL,
            incode TEXT NOT NULL CHECK (length(incode) = 3),
            latitude REAL NOT NULL CHECK (latitude BETWEEN -90 AND 90),
            longitude REAL NOT NULL CHECK (longitude BETWEEN -180 AND 180),
            quality INTEGER NOT NULL DEFAULT 0,
            country TEXT,
            nhs_ha TEXT,
            admin_county TEXT,
            admin_district TEXT,
            admin_ward TEXT,
            constituency TEXT,
            european_electoral_region TEXT,
            primary_care_trust TEXT,
            region TEXT,
            parish TEXT,
            lsoa TEXT,
            msoa TEXT,
            nuts TEXT,
            ingest_run INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            datum TEXT NOT NULL,
            files INTEGER NOT NULL DEFAULT 0,
            rows INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            pruned INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Spatial index over location. Virtual table creation is checked
    // explicitly so repeated runs stay quiet.
    let rtree_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='postcodes_rtree'",
    )
    .fetch_one(pool)
    .await?;

    if !rtree_exists {
        sqlx::query(
            "CREATE VIRTUAL TABLE postcodes_rtree USING rtree(id, min_lon, max_lon, min_lat, max_lat)",
        )
        .execute(pool)
        .await?;
    }

    // Triggers keep the R*Tree in step with latitude/longitude.
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS postcodes_location_ai AFTER INSERT ON postcodes BEGIN
            INSERT OR REPLACE INTO postcodes_rtree (id, min_lon, max_lon, min_lat, max_lat)
            VALUES (new.id, new.longitude, new.longitude, new.latitude, new.latitude);
        END
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS postcodes_location_au
        AFTER UPDATE OF latitude, longitude ON postcodes BEGIN
            INSERT OR REPLACE INTO postcodes_rtree (id, min_lon, max_lon, min_lat, max_lat)
            VALUES (new.id, new.longitude, new.longitude, new.latitude, new.latitude);
        END
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS postcodes_location_ad AFTER DELETE ON postcodes BEGIN
            DELETE FROM postcodes_rtree WHERE id = old.id;
        END
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_postcodes_trimmed ON postcodes(postcode_trimmed)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_postcodes_outcode ON postcodes(outcode)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_postcodes_ingest_run ON postcodes(ingest_run)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent_and_index_tracks_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("pc.sqlite")).await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO postcodes (postcode, postcode_trimmed, outcode, incode, latitude, longitude, created_at, updated_at)
             VALUES ('M1 1AE', 'M11AE', 'M1', '1AE', 53.48, -2.24, 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("UPDATE postcodes SET latitude = 53.5 WHERE postcode = 'M1 1AE'")
            .execute(&pool)
            .await
            .unwrap();

        let (count, min_lat): (i64, f64) =
            sqlx::query_as("SELECT COUNT(*), MIN(min_lat) FROM postcodes_rtree")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert!((min_lat - 53.5).abs() < 1e-4);

        sqlx::query("DELETE FROM postcodes").execute(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM postcodes_rtree")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn rejects_out_of_range_latitude() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("pc.sqlite")).await.unwrap();
        migrate(&pool).await.unwrap();

        let result = sqlx::query(
            "INSERT INTO postcodes (postcode, postcode_trimmed, outcode, incode, latitude, longitude, created_at, updated_at)
             VALUES ('M1 1AE', 'M11AE', 'M1', '1AE', 95.0, -2.24, 0, 0)",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
