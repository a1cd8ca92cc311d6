#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` persistence for the tract snapshot cache.
//!
//! [`snapshots::DuckDbSnapshotStore`] implements
//! [`canvass_cache::SnapshotStore`] over a single `tract_snapshots`
//! table, so cached demographics survive process restarts.

pub mod paths;
pub mod snapshots;

use canvass_cache::StoreError;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query or connection error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Io(e) => Self::Io(e),
            e => Self::Backend {
                message: e.to_string(),
            },
        }
    }
}
