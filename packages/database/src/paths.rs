//! Canonical file paths for the `DuckDB` data directory.
//!
//! Paths default to the project root's `data/` directory. Set
//! `CANVASS_CACHE_PATH` to put the snapshot cache somewhere else.

use std::path::{Path, PathBuf};

/// Environment variable overriding [`snapshot_cache_db_path`].
pub const CACHE_PATH_ENV: &str = "CANVASS_CACHE_PATH";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`, falling back to
/// the working directory if the manifest is not nested as expected.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the `data/shared/` directory for shared databases.
#[must_use]
pub fn shared_dir() -> PathBuf {
    data_dir().join("shared")
}

/// Returns the path for the tract snapshot cache `DuckDB` file.
#[must_use]
pub fn snapshot_cache_db_path() -> PathBuf {
    std::env::var_os(CACHE_PATH_ENV)
        .filter(|p| !p.is_empty())
        .map_or_else(|| shared_dir().join("tract_snapshots.duckdb"), PathBuf::from)
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
