//! # Postcode Locator Core
//!
//! Shared, I/O-free logic for Postcode Locator: national-grid to WGS84
//! conversion, postcode normalization, great-circle distance, data models,
//! and the store abstraction with an in-memory implementation.
//!
//! This crate contains no tokio, sqlx, or filesystem access. Storage
//! backends and the ingestion pipeline live in the `postcode-locator`
//! crate.

pub mod distance;
pub mod geodesy;
pub mod models;
pub mod postcode;
pub mod store;

pub use distance::{great_circle_distance, SearchEnvelope, EARTH_RADIUS_METERS};
pub use geodesy::{ConvergenceError, DatumPreset, DatumShift, GridConverter, GridRef, LatLon};
pub use models::{AdminAreas, PostcodeRecord, PostcodeView, PostcodeWithDistance};
pub use postcode::{normalize, Postcode};
pub use store::memory::InMemoryStore;
pub use store::PostcodeStore;
