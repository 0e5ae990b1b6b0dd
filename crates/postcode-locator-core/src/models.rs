//! Postcode data models.
//!
//! [`PostcodeRecord`] is the full internal row. [`PostcodeView`] is the
//! public projection returned to callers outside the store.

use geo::Point;
use serde::{Deserialize, Serialize};

use crate::geodesy::LatLon;
use crate::postcode::Postcode;

/// Administrative area codes carried through from the source dataset.
///
/// Opaque, nullable, never used for computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAreas {
    pub country: Option<String>,
    pub nhs_ha: Option<String>,
    pub admin_county: Option<String>,
    pub admin_district: Option<String>,
    pub admin_ward: Option<String>,
    pub constituency: Option<String>,
    pub european_electoral_region: Option<String>,
    pub primary_care_trust: Option<String>,
    pub region: Option<String>,
    pub parish: Option<String>,
    pub lsoa: Option<String>,
    pub msoa: Option<String>,
    pub nuts: Option<String>,
}

/// A stored postcode with every column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcodeRecord {
    pub postcode: Postcode,
    /// WGS84 position.
    pub position: LatLon,
    /// Positional quality indicator from the source (0 when absent).
    pub quality: i64,
    pub admin: AdminAreas,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    /// Unix timestamp (seconds).
    pub updated_at: i64,
}

impl PostcodeRecord {
    pub fn new(postcode: Postcode, position: LatLon) -> Self {
        Self {
            postcode,
            position,
            quality: 0,
            admin: AdminAreas::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Spatial location with `x = longitude`, `y = latitude`.
    ///
    /// Derived from `position` on every call, so the two never diverge.
    pub fn location(&self) -> Point<f64> {
        Point::new(self.position.longitude, self.position.latitude)
    }

    pub fn view(&self) -> PostcodeView {
        PostcodeView::from(self)
    }
}

/// Fields exposed to API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcodeView {
    pub postcode: String,
    pub postcode_trimmed: String,
    pub latitude: f64,
    pub longitude: f64,
    pub incode: String,
    pub outcode: String,
}

impl From<&PostcodeRecord> for PostcodeView {
    fn from(record: &PostcodeRecord) -> Self {
        Self {
            postcode: record.postcode.canonical.clone(),
            postcode_trimmed: record.postcode.compact.clone(),
            latitude: record.position.latitude,
            longitude: record.position.longitude,
            incode: record.postcode.inward.clone(),
            outcode: record.postcode.outward.clone(),
        }
    }
}

/// A radius-search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcodeWithDistance {
    #[serde(flatten)]
    pub postcode: PostcodeView,
    /// Great-circle distance from the search center, meters.
    pub distance: f64,
}
