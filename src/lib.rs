//! # Postcode Locator
//!
//! Resolves UK postcodes to WGS84 latitude/longitude and answers radius and
//! distance queries.
//!
//! The quarterly postcode archive publishes national-grid eastings and
//! northings. Postcode Locator converts each one to WGS84, stores it in
//! SQLite alongside an R*Tree spatial index, and serves lookups through a
//! CLI and a small HTTP service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │   Archive   │──▶│     Pipeline     │──▶│    SQLite     │
//! │ HTTP / file │   │ unzip+convert+tx │   │ table + rtree │
//! └─────────────┘   └──────────────────┘   └───────┬───────┘
//!                                                  │
//!                              ┌───────────────────┤
//!                              ▼                   ▼
//!                         ┌──────────┐       ┌──────────┐
//!                         │   CLI    │       │   HTTP   │
//!                         │  (pcl)   │       │ + cache  │
//!                         └──────────┘       └──────────┘
//! ```
//!
//! Grid conversion, normalization, distance and the store trait live in
//! the I/O-free `postcode-locator-core` crate.
//!
//! ## Quick Start
//!
//! ```bash
//! pcl init                         # create database
//! pcl update                       # download and load the archive
//! pcl lookup "SW1A 1AA"
//! pcl radius "SW1A 1AA" 1500
//! pcl serve                        # start HTTP service
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite-backed postcode store |
//! | [`archive`] | Archive download and extraction |
//! | [`ingest`] | Ingestion pipeline |
//! | [`error`] | Typed ingestion errors |
//! | [`progress`] | Ingestion progress reporting |
//! | [`schedule`] | Update schedule and run lock |
//! | [`cache`] | Query result cache |
//! | [`query`] | CLI queries |
//! | [`server`] | HTTP query service |
//! | [`stats`] | Database statistics |

pub mod archive;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod query;
pub mod schedule;
pub mod server;
pub mod sqlite_store;
pub mod stats;
