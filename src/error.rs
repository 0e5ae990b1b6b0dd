//! Typed errors for the ingestion pipeline.
//!
//! [`IngestError`] aborts a run and rolls its transaction back. Callers use
//! [`IngestError::is_transient`] to decide whether a retry could help.
//! [`RowError`] describes a single unusable source row. Rows are skipped and
//! logged, never fatal.

use std::io;
use std::path::PathBuf;

use postcode_locator_core::geodesy::{ConvergenceError, LatLon};
use thiserror::Error;

/// Failure talking to the remote archive host.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with an error status.
    #[error("request to {url} failed with status {status}")]
    Http { url: String, status: u16 },
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },
    /// Connection or body transfer failed.
    #[error("network error contacting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub(crate) fn from_reqwest(error: reqwest::Error, url: &str) -> Self {
        if let Some(status) = error.status() {
            return TransportError::Http {
                url: url.to_owned(),
                status: status.as_u16(),
            };
        }
        if error.is_timeout() {
            return TransportError::Timeout {
                url: url.to_owned(),
            };
        }
        TransportError::Network {
            url: url.to_owned(),
            source: io::Error::other(error),
        }
    }
}

/// Error that aborts an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to fetch archive: {0}")]
    Fetch(#[from] TransportError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive {path} is malformed: {source}")]
    MalformedArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("archive {path} contains no files matching {patterns:?}")]
    NoDataFiles {
        path: PathBuf,
        patterns: Vec<String>,
    },

    #[error("invalid file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for infrastructure failures worth retrying: the network, local
    /// disk, or database. False when the source data itself is unusable.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Fetch(_) | IngestError::Io { .. } | IngestError::Storage(_) => true,
            // A CSV error that is really an I/O error is transient too.
            IngestError::Csv { source, .. } => source.is_io_error(),
            IngestError::MalformedArchive { .. }
            | IngestError::NoDataFiles { .. }
            | IngestError::Pattern { .. } => false,
        }
    }
}

/// Reason a single source row was skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowError {
    #[error("expected at least {expected} columns, found {found}")]
    TooFewColumns { expected: usize, found: usize },

    #[error("'{0}' is not a valid postcode")]
    InvalidPostcode(String),

    #[error("{column} '{value}' is not a number")]
    NotNumeric { column: &'static str, value: String },

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error("converted position {0:?} is out of range")]
    OutOfRange(LatLon),
}
