//! Great-circle distance on a spherical Earth.

use std::f64::consts::{FRAC_PI_2, PI};

use geo::{coord, Rect};

use crate::geodesy::LatLon;

/// Mean Earth radius used for every distance in this crate.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Slack added to envelopes so points exactly on the radius survive
/// floating-point rounding.
const ENVELOPE_SLACK_DEG: f64 = 1e-9;

/// Haversine great-circle distance in meters.
///
/// ```
/// use postcode_locator_core::{great_circle_distance, LatLon};
///
/// let a = LatLon::new(51.5, -0.14);
/// assert_eq!(great_circle_distance(a, a), 0.0);
/// ```
pub fn great_circle_distance(a: LatLon, b: LatLon) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let dlat = lat_b - lat_a;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (dlon / 2.0).sin().powi(2);
    let angle = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_METERS * angle
}

/// Latitude/longitude box that contains every point within a given
/// great-circle radius of a center.
///
/// Used as a cheap index prefilter; callers still apply
/// [`great_circle_distance`] to the candidates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchEnvelope {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl SearchEnvelope {
    pub fn around(center: LatLon, radius_m: f64) -> Self {
        let angular = radius_m.max(0.0) / EARTH_RADIUS_METERS;
        let lat = center.latitude.to_radians();
        let lon = center.longitude.to_radians();

        let mut min_lat = lat - angular;
        let mut max_lat = lat + angular;
        let (mut min_lon, mut max_lon) = (-PI, PI);

        if min_lat > -FRAC_PI_2 && max_lat < FRAC_PI_2 {
            // Longitude bound at the latitude where the circle is tangent to
            // a meridian.
            let ratio = angular.sin() / lat.cos();
            if angular < FRAC_PI_2 && ratio < 1.0 {
                let dlon = ratio.asin();
                if lon - dlon >= -PI && lon + dlon <= PI {
                    min_lon = lon - dlon;
                    max_lon = lon + dlon;
                }
            }
        } else {
            min_lat = min_lat.max(-FRAC_PI_2);
            max_lat = max_lat.min(FRAC_PI_2);
        }

        Self {
            min_lat: (min_lat.to_degrees() - ENVELOPE_SLACK_DEG).max(-90.0),
            max_lat: (max_lat.to_degrees() + ENVELOPE_SLACK_DEG).min(90.0),
            min_lon: (min_lon.to_degrees() - ENVELOPE_SLACK_DEG).max(-180.0),
            max_lon: (max_lon.to_degrees() + ENVELOPE_SLACK_DEG).min(180.0),
        }
    }

    pub fn contains(&self, point: LatLon) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }

    /// The envelope as a `geo::Rect` with `x = longitude`, `y = latitude`.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_lon, y: self.min_lat },
            coord! { x: self.max_lon, y: self.max_lat },
        )
    }
}
