//! Storage abstraction for postcode records.
//!
//! The [`PostcodeStore`] trait defines the two primitive reads a backend
//! must provide (exact lookup by canonical code and a great-circle radius
//! filter) and builds the three public query shapes on top of them:
//!
//! | Method | Absent input yields |
//! |--------|---------------------|
//! | [`lookup`](PostcodeStore::lookup) | `Ok(None)` |
//! | [`radius_search`](PostcodeStore::radius_search) | `Ok(vec![])` |
//! | [`distance`](PostcodeStore::distance) | `Ok(None)` |
//!
//! "Not found" is never an error. `Err` is reserved for backend failures.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;

use crate::distance::great_circle_distance;
use crate::geodesy::LatLon;
use crate::models::{PostcodeRecord, PostcodeView, PostcodeWithDistance};
use crate::postcode::{normalize, Postcode};

/// Read access to persisted postcode records.
#[async_trait]
pub trait PostcodeStore: Send + Sync {
    /// Fetch the full record whose canonical code matches exactly.
    async fn find(&self, postcode: &Postcode) -> Result<Option<PostcodeRecord>>;

    /// Every record within `radius_m` great-circle meters of `center`,
    /// paired with its distance and ordered as [`sort_hits`] orders them.
    async fn within(&self, center: LatLon, radius_m: f64) -> Result<Vec<(PostcodeRecord, f64)>>;

    /// Number of stored records.
    async fn count(&self) -> Result<i64>;

    /// Public view of the record for `raw`, after normalization.
    async fn lookup(&self, raw: &str) -> Result<Option<PostcodeView>> {
        let Some(postcode) = normalize(raw) else {
            return Ok(None);
        };
        Ok(self.find(&postcode).await?.map(|r| r.view()))
    }

    /// Records around the postcode `raw`, nearest first. The center is
    /// included at distance zero.
    async fn radius_search(&self, raw: &str, radius_m: f64) -> Result<Vec<PostcodeWithDistance>> {
        let Some(postcode) = normalize(raw) else {
            return Ok(Vec::new());
        };
        let Some(center) = self.find(&postcode).await? else {
            return Ok(Vec::new());
        };

        let hits = self.within(center.position, radius_m).await?;
        Ok(hits
            .into_iter()
            .map(|(record, distance)| PostcodeWithDistance {
                postcode: record.view(),
                distance,
            })
            .collect())
    }

    /// Great-circle meters between two postcodes, `None` if either is
    /// unknown.
    async fn distance(&self, from: &str, to: &str) -> Result<Option<f64>> {
        let (Some(from), Some(to)) = (normalize(from), normalize(to)) else {
            return Ok(None);
        };
        let Some(a) = self.find(&from).await? else {
            return Ok(None);
        };
        let Some(b) = self.find(&to).await? else {
            return Ok(None);
        };
        Ok(Some(great_circle_distance(a.position, b.position)))
    }
}

/// Ascending by distance, then by canonical code for a stable order.
pub fn sort_hits(hits: &mut [(PostcodeRecord, f64)]) {
    hits.sort_by(|(ra, da), (rb, db)| match da.total_cmp(db) {
        Ordering::Equal => ra.postcode.canonical.cmp(&rb.postcode.canonical),
        other => other,
    });
}

/// Keep `candidates` within `radius_m` of `center`, annotated and sorted.
///
/// Shared by backends whose index returns a superset of the circle.
pub fn filter_within(
    candidates: impl IntoIterator<Item = PostcodeRecord>,
    center: LatLon,
    radius_m: f64,
) -> Vec<(PostcodeRecord, f64)> {
    let mut hits: Vec<(PostcodeRecord, f64)> = candidates
        .into_iter()
        .map(|record| {
            let d = great_circle_distance(center, record.position);
            (record, d)
        })
        .filter(|(_, d)| *d <= radius_m)
        .collect();
    sort_hits(&mut hits);
    hits
}
