//! Tract snapshot table stored in `DuckDB`.
//!
//! One row per tract. A refresh replaces the row, matching the
//! in-memory cache's replace-on-commit semantics. `fetched_at` is kept
//! as microseconds since the Unix epoch so freshness can be recomputed
//! exactly after a restart.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use canvass_area_models::{AreaId, Coordinate, DemographicSnapshot};
use canvass_cache::{SnapshotStore, StoreError};
use chrono::DateTime;
use duckdb::Connection;

use crate::DbError;

/// A `tract_snapshots` row as read back from `DuckDB`:
/// `(area_id, income, home_value, population, homeownership, lat, lng, fetched_at_micros)`.
type SnapshotRow = (String, f64, f64, i64, f64, Option<f64>, Option<f64>, i64);

/// [`SnapshotStore`] over a `DuckDB` connection.
pub struct DuckDbSnapshotStore {
    conn: Mutex<Connection>,
}

impl DuckDbSnapshotStore {
    /// Opens (or creates) the snapshot database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens the snapshot database at the default path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&crate::paths::snapshot_cache_db_path())
    }

    /// Opens a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of stored rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn count(&self) -> Result<u64, DbError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tract_snapshots", [], |row| {
            row.get(0)
        })?;
        u64::try_from(count).map_err(|_| DbError::Conversion {
            message: format!("negative row count {count}"),
        })
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tract_snapshots (
            area_id TEXT PRIMARY KEY,
            median_income DOUBLE NOT NULL,
            median_home_value DOUBLE NOT NULL,
            population BIGINT NOT NULL,
            homeownership_rate DOUBLE NOT NULL,
            centroid_lat DOUBLE,
            centroid_lng DOUBLE,
            fetched_at_micros BIGINT NOT NULL
        );",
    )?;
    Ok(())
}

fn row_to_snapshot(row: SnapshotRow) -> Result<DemographicSnapshot, StoreError> {
    let (area_id, income, home_value, population, homeownership, lat, lng, micros) = row;

    let corrupt = |message: String| StoreError::Corrupt {
        area_id: area_id.clone(),
        message,
    };

    let population =
        u64::try_from(population).map_err(|_| corrupt(format!("negative population {population}")))?;
    let fetched_at = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| corrupt(format!("fetched_at {micros} out of range")))?;

    Ok(DemographicSnapshot {
        area_id: AreaId::new(area_id),
        median_income: income,
        median_home_value: home_value,
        population,
        homeownership_rate: homeownership,
        centroid: lat.zip(lng).map(|(lat, lng)| Coordinate::new(lat, lng)),
        fetched_at,
    })
}

impl SnapshotStore for DuckDbSnapshotStore {
    fn load_all(&self) -> Result<Vec<DemographicSnapshot>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT area_id, median_income, median_home_value, population,
                        homeownership_rate, centroid_lat, centroid_lng, fetched_at_micros
                 FROM tract_snapshots
                 ORDER BY area_id",
            )
            .map_err(DbError::from)?;

        let rows = stmt
            .query_map([], |row| -> duckdb::Result<SnapshotRow> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })
            .map_err(DbError::from)?;

        let mut snapshots = Vec::new();
        for row in rows {
            let row = row.map_err(DbError::from)?;
            match row_to_snapshot(row) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => log::warn!("Skipping stored snapshot: {e}"),
            }
        }
        Ok(snapshots)
    }

    fn save(&self, snapshot: &DemographicSnapshot) -> Result<(), StoreError> {
        let population = i64::try_from(snapshot.population).map_err(|_| StoreError::Corrupt {
            area_id: snapshot.area_id.to_string(),
            message: format!("population {} does not fit in BIGINT", snapshot.population),
        })?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO tract_snapshots (
                    area_id, median_income, median_home_value, population,
                    homeownership_rate, centroid_lat, centroid_lng, fetched_at_micros
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                duckdb::params![
                    snapshot.area_id.as_str(),
                    snapshot.median_income,
                    snapshot.median_home_value,
                    population,
                    snapshot.homeownership_rate,
                    snapshot.centroid.map(|c| c.latitude),
                    snapshot.centroid.map(|c| c.longitude),
                    snapshot.fetched_at.timestamp_micros(),
                ],
            )
            .map_err(DbError::from)?;
        Ok(())
    }

    fn remove(&self, area_id: &AreaId) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "DELETE FROM tract_snapshots WHERE area_id = ?",
                duckdb::params![area_id.as_str()],
            )
            .map_err(DbError::from)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn()
            .execute_batch("DELETE FROM tract_snapshots;")
            .map_err(DbError::from)?;
        Ok(())
    }
}
