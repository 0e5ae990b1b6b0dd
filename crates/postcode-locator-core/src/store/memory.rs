//! In-memory [`PostcodeStore`] backed by an R\*-tree.
//!
//! Records live in a `HashMap` keyed by canonical code. An `rstar::RTree`
//! over each record's [`location`](PostcodeRecord::location) is rebuilt with
//! `bulk_load` whenever records are inserted. Both sit behind one lock, so
//! readers always see a map and index that agree. Used by tests and by
//! callers that hold a small dataset entirely in memory.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use geo::{Point, Rect};
use rstar::{RTree, RTreeObject, AABB};

use crate::distance::SearchEnvelope;
use crate::geodesy::LatLon;
use crate::models::PostcodeRecord;
use crate::postcode::Postcode;

use super::{filter_within, PostcodeStore};

#[derive(Debug, Clone)]
struct IndexedPostcode {
    canonical: String,
    location: Point<f64>,
}

impl From<&PostcodeRecord> for IndexedPostcode {
    fn from(record: &PostcodeRecord) -> Self {
        Self {
            canonical: record.postcode.canonical.clone(),
            location: record.location(),
        }
    }
}

impl RTreeObject for IndexedPostcode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.location.x(), self.location.y()])
    }
}

fn rect_to_aabb(bbox: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y])
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, PostcodeRecord>,
    index: RTree<IndexedPostcode>,
}

/// In-memory store for tests and small datasets.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory postcode store lock poisoned")
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite records keyed by canonical code, then rebuild
    /// the spatial index.
    pub fn insert_many(&self, records: impl IntoIterator<Item = PostcodeRecord>) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        for record in records {
            inner
                .records
                .insert(record.postcode.canonical.clone(), record);
        }

        let entries: Vec<IndexedPostcode> =
            inner.records.values().map(IndexedPostcode::from).collect();
        inner.index = RTree::bulk_load(entries);
        Ok(())
    }
}

#[async_trait]
impl PostcodeStore for InMemoryStore {
    async fn find(&self, postcode: &Postcode) -> Result<Option<PostcodeRecord>> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.records.get(&postcode.canonical).cloned())
    }

    async fn within(&self, center: LatLon, radius_m: f64) -> Result<Vec<(PostcodeRecord, f64)>> {
        let query = rect_to_aabb(&SearchEnvelope::around(center, radius_m).to_rect());

        let candidates: Vec<PostcodeRecord> = {
            let inner = self.inner.read().map_err(poisoned)?;
            inner
                .index
                .locate_in_envelope(&query)
                .filter_map(|entry| inner.records.get(&entry.canonical).cloned())
                .collect()
        };

        Ok(filter_within(candidates, center, radius_m))
    }

    async fn count(&self) -> Result<i64> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.records.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::great_circle_distance;
    use crate::geodesy::{GridConverter, GridRef};
    use crate::postcode::normalize;
    use rstest::{fixture, rstest};

    fn record(code: &str, lat: f64, lon: f64) -> PostcodeRecord {
        PostcodeRecord::new(normalize(code).unwrap(), LatLon::new(lat, lon))
    }

    #[fixture]
    fn westminster() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_many([
                record("SW1A 1AA", 51.501_009, -0.141_588),
                record("SW1A 2AA", 51.503_541, -0.127_670),
                record("SW1A 0AA", 51.499_840, -0.124_663),
                record("W1A 0AX", 51.518_561, -0.143_799),
                record("EH1 1YZ", 55.952_061, -3.188_227),
            ])
            .unwrap();
        store
    }

    #[tokio::test]
    async fn lookup_on_empty_store_is_absent() {
        let store = InMemoryStore::new();
        assert_eq!(store.lookup("XX1 1XX").await.unwrap(), None);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn lookup_normalizes_input(westminster: InMemoryStore) {
        let view = westminster.lookup("sw1a1aa").await.unwrap().unwrap();
        assert_eq!(view.postcode, "SW1A 1AA");
        assert_eq!(view.outcode, "SW1A");
        assert!(westminster.lookup("AB").await.unwrap().is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn radius_search_is_sorted_and_bounded(westminster: InMemoryStore) {
        let hits = westminster.radius_search("SW1A 1AA", 1_500.0).await.unwrap();
        let codes: Vec<&str> = hits.iter().map(|h| h.postcode.postcode.as_str()).collect();
        assert_eq!(codes, ["SW1A 1AA", "SW1A 2AA", "SW1A 0AA"]);

        assert_eq!(hits[0].distance, 0.0);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        assert!(hits.iter().all(|h| h.distance <= 1_500.0));
    }

    #[rstest]
    #[tokio::test]
    async fn radius_search_unknown_center_is_empty(westminster: InMemoryStore) {
        assert!(westminster
            .radius_search("ZZ9 9ZZ", 50_000.0)
            .await
            .unwrap()
            .is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn distance_properties(westminster: InMemoryStore) {
        assert_eq!(
            westminster.distance("SW1A 1AA", "sw1a1aa").await.unwrap(),
            Some(0.0)
        );

        let ab = westminster.distance("SW1A 1AA", "EH1 1YZ").await.unwrap().unwrap();
        let ba = westminster.distance("EH1 1YZ", "SW1A 1AA").await.unwrap().unwrap();
        assert_eq!(ab, ba);
        assert!(ab > 500_000.0);

        assert_eq!(westminster.distance("SW1A 1AA", "ZZ9 9ZZ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn insert_overwrites_by_canonical_code() {
        let store = InMemoryStore::new();
        store.insert_many([record("M1 1AE", 53.0, -2.0)]).unwrap();
        store.insert_many([record("m11ae", 53.5, -2.2)]).unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let view = store.lookup("M1 1AE").await.unwrap().unwrap();
        assert_eq!(view.latitude, 53.5);

        let stale = store.within(LatLon::new(53.0, -2.0), 10.0).await.unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn grid_points_five_meters_apart() {
        let converter = GridConverter::default();
        let a = converter.to_wgs84(GridRef::new(529_090.0, 179_645.0)).unwrap();
        let b = converter.to_wgs84(GridRef::new(529_095.0, 179_650.0)).unwrap();

        let store = InMemoryStore::new();
        store
            .insert_many([
                PostcodeRecord::new(normalize("AA1 1AA").unwrap(), a),
                PostcodeRecord::new(normalize("AA1 1AB").unwrap(), b),
            ])
            .unwrap();

        let stored = store.distance("AA1 1AA", "AA1 1AB").await.unwrap().unwrap();
        assert_eq!(stored, great_circle_distance(a, b));

        let planar = 50f64.sqrt();
        assert!((stored - planar).abs() / planar < 0.005, "{stored} vs {planar}");
    }

    #[test]
    fn writes_and_radius_queries_run_concurrently() {
        use std::sync::{mpsc, Arc};
        use std::time::Duration;

        let store = Arc::new(InMemoryStore::new());
        store.insert_many([record("SW1A 1AA", 51.501_009, -0.141_588)]).unwrap();
        let (done_tx, done_rx) = mpsc::channel();

        let writer = {
            let store = Arc::clone(&store);
            let done = done_tx.clone();
            std::thread::spawn(move || {
                for i in 0..2_000 {
                    let lat = 51.5 + (i % 100) as f64 * 1e-5;
                    store.insert_many([record("SW1A 2AA", lat, -0.1277)]).unwrap();
                }
                done.send("writer").unwrap();
            })
        };
        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                for _ in 0..2_000 {
                    let hits = rt
                        .block_on(store.within(LatLon::new(51.501_009, -0.141_588), 100.0))
                        .unwrap();
                    assert_eq!(hits.len(), 1);
                }
                done_tx.send("reader").unwrap();
            })
        };

        for _ in 0..2 {
            done_rx
                .recv_timeout(Duration::from_secs(30))
                .expect("store operations did not finish");
        }
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(store.inner.read().unwrap().records.len(), 2);
    }
}
