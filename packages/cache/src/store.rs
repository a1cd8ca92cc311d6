//! Persistence seam for cached snapshots.
//!
//! [`crate::AreaCache`] keeps its working set in memory. A
//! [`SnapshotStore`] lets that working set survive restarts: the cache
//! loads everything on construction and writes every committed snapshot
//! through. Store failures are logged by the cache and never fail a
//! lookup.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use canvass_area_models::{AreaId, DemographicSnapshot};
use thiserror::Error;

/// Errors from a persistence back-end.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The back-end rejected an operation.
    #[error("Snapshot store error: {message}")]
    Backend {
        /// Back-end specific description.
        message: String,
    },

    /// A stored row could not be turned back into a snapshot.
    #[error("Corrupt snapshot row for {area_id}: {message}")]
    Corrupt {
        /// Identifier of the offending row.
        area_id: String,
        /// What was wrong with it.
        message: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Durable home for [`DemographicSnapshot`]s, keyed by area.
pub trait SnapshotStore: Send + Sync {
    /// Loads every stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the back-end cannot be read.
    fn load_all(&self) -> Result<Vec<DemographicSnapshot>, StoreError>;

    /// Inserts or replaces the snapshot for its area.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn save(&self, snapshot: &DemographicSnapshot) -> Result<(), StoreError>;

    /// Deletes the snapshot for one area, if present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn remove(&self, area_id: &AreaId) -> Result<(), StoreError>;

    /// Deletes every snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the delete fails.
    fn clear(&self) -> Result<(), StoreError>;
}

/// A [`SnapshotStore`] that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    rows: Mutex<BTreeMap<AreaId, DemographicSnapshot>>,
}

impl MemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load_all(&self) -> Result<Vec<DemographicSnapshot>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    fn save(&self, snapshot: &DemographicSnapshot) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.area_id.clone(), snapshot.clone());
        Ok(())
    }

    fn remove(&self, area_id: &AreaId) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(area_id);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
