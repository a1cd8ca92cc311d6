#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Time-expiring demographic snapshot cache.
//!
//! [`AreaCache::get_or_fetch`] serves a snapshot from memory while it is
//! younger than [`DemographicSnapshot::validity`] and otherwise refreshes
//! it through a [`DemographicsFetcher`]. Refreshes are single-flight per
//! area: concurrent callers for one tract share one outbound fetch while
//! callers for other tracts proceed independently.
//!
//! When a refresh fails the previous snapshot, however old, is served
//! instead and flagged as [`SnapshotSource::StaleFallback`].

pub mod clock;
pub mod store;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use canvass_area_models::{AreaId, DemographicSnapshot};
use canvass_demographics::{DemographicsFetchError, DemographicsFetcher};

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{MemorySnapshotStore, SnapshotStore, StoreError};

/// Where a [`CacheLookup`] snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Fresh entry already in memory.
    Cached,
    /// Fetched from the provider by this call or by the flight it joined.
    Fetched,
    /// The refresh failed and an expired entry was served instead.
    StaleFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub snapshot: DemographicSnapshot,
    pub source: SnapshotSource,
}

impl CacheLookup {
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.source == SnapshotSource::StaleFallback
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a fresh entry.
    pub hits: u64,
    /// Lookups answered by a fetch another caller started.
    pub coalesced: u64,
    /// Provider fetches that completed and were committed.
    pub fetches: u64,
    /// Lookups answered with an expired entry after a failed refresh.
    pub stale_fallbacks: u64,
    /// Lookups that failed with no entry to fall back on.
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    coalesced: AtomicU64,
    fetches: AtomicU64,
    stale_fallbacks: AtomicU64,
    failures: AtomicU64,
}

/// One refresh of one area, shared by every caller that arrives while it
/// is alive.
///
/// The gate holds the error of a failed attempt so the remaining waiters
/// report it instead of retrying.
#[derive(Default)]
struct Flight {
    gate: tokio::sync::Mutex<Option<DemographicsFetchError>>,
}

/// Concurrency-safe, time-expiring demographic cache.
pub struct AreaCache {
    fetcher: Arc<DemographicsFetcher>,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn SnapshotStore>>,
    entries: RwLock<BTreeMap<AreaId, DemographicSnapshot>>,
    flights: FlightMap,
    counters: Counters,
}

impl AreaCache {
    #[must_use]
    pub fn new(fetcher: Arc<DemographicsFetcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            fetcher,
            clock,
            store: None,
            entries: RwLock::new(BTreeMap::new()),
            flights: Mutex::new(BTreeMap::new()),
            counters: Counters::default(),
        }
    }

    /// Creates a cache backed by `store`.
    ///
    /// Every stored snapshot is loaded up front, fresh or not, so expired
    /// entries can still serve as fallbacks. A store that cannot be read
    /// is logged and the cache starts empty.
    #[must_use]
    pub fn with_store(
        fetcher: Arc<DemographicsFetcher>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let mut cache = Self::new(fetcher, clock);

        match store.load_all() {
            Ok(snapshots) => {
                let count = snapshots.len();
                let entries = cache
                    .entries
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner);
                for snapshot in snapshots {
                    entries.insert(snapshot.area_id.clone(), snapshot);
                }
                log::info!("Loaded {count} cached tract snapshots");
            }
            Err(e) => log::warn!("Could not load cached tract snapshots: {e}"),
        }

        cache.store = Some(store);
        cache
    }

    /// Returns a fresh snapshot for `area_id`, fetching it if needed.
    ///
    /// # Errors
    ///
    /// Returns the fetch error when the refresh fails and there is no
    /// previous snapshot to fall back on.
    pub async fn get_or_fetch(&self, area_id: &AreaId) -> Result<CacheLookup, DemographicsFetchError> {
        if let Some(snapshot) = self.fresh(area_id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("Cache hit for {area_id}");
            return Ok(CacheLookup {
                snapshot,
                source: SnapshotSource::Cached,
            });
        }

        let flight = FlightTicket::join(&self.flights, area_id);
        let mut gate = flight.flight().gate.lock().await;

        // Whoever held the gate before us may have refreshed the entry.
        if let Some(snapshot) = self.fresh(area_id) {
            self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
            return Ok(CacheLookup {
                snapshot,
                source: SnapshotSource::Fetched,
            });
        }

        if let Some(error) = gate.as_ref() {
            return self.fall_back(area_id, error.clone());
        }

        match self.fetcher.fetch(area_id).await {
            Ok(snapshot) => Ok(CacheLookup {
                snapshot: self.commit(snapshot),
                source: SnapshotSource::Fetched,
            }),
            Err(e) => {
                *gate = Some(e.clone());
                self.fall_back(area_id, e)
            }
        }
    }

    /// Number of entries in memory, fresh or stale.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            fetches: self.counters.fetches.load(Ordering::Relaxed),
            stale_fallbacks: self.counters.stale_fallbacks.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Returns the entry for `area_id` without fetching, fresh or not.
    #[must_use]
    pub fn peek(&self, area_id: &AreaId) -> Option<DemographicSnapshot> {
        self.read_entries().get(area_id).cloned()
    }

    /// Drops one area so the next lookup refetches it.
    ///
    /// Returns whether an entry was present in memory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot delete the row.
    pub fn invalidate(&self, area_id: &AreaId) -> Result<bool, StoreError> {
        let removed = self.write_entries().remove(area_id).is_some();
        if let Some(store) = &self.store {
            store.remove(area_id)?;
        }
        Ok(removed)
    }

    /// Drops every entry, in memory and in the backing store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing store cannot be cleared.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.write_entries().clear();
        if let Some(store) = &self.store {
            store.clear()?;
        }
        log::info!("Cleared tract snapshot cache");
        Ok(())
    }

    fn fresh(&self, area_id: &AreaId) -> Option<DemographicSnapshot> {
        let now = self.clock.now();
        self.read_entries()
            .get(area_id)
            .filter(|s| s.is_fresh_at(now))
            .cloned()
    }

    /// Stamps and stores a fetched snapshot.
    ///
    /// Synchronous: once the fetch has resolved the entry is written
    /// before control returns to the executor.
    fn commit(&self, mut snapshot: DemographicSnapshot) -> DemographicSnapshot {
        snapshot.fetched_at = self.clock.now();
        self.write_entries()
            .insert(snapshot.area_id.clone(), snapshot.clone());
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&snapshot) {
                log::warn!("Failed to persist snapshot for {}: {e}", snapshot.area_id);
            }
        }

        snapshot
    }

    fn fall_back(
        &self,
        area_id: &AreaId,
        error: DemographicsFetchError,
    ) -> Result<CacheLookup, DemographicsFetchError> {
        if let Some(snapshot) = self.peek(area_id) {
            self.counters.stale_fallbacks.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "Refresh of {area_id} failed ({error}); serving snapshot from {}",
                snapshot.fetched_at
            );
            return Ok(CacheLookup {
                snapshot,
                source: SnapshotSource::StaleFallback,
            });
        }

        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        Err(error)
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<AreaId, DemographicSnapshot>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<AreaId, DemographicSnapshot>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

type FlightMap = Mutex<BTreeMap<AreaId, FlightEntry>>;

struct FlightEntry {
    flight: Arc<Flight>,
    tickets: usize,
}

/// A caller's membership in a [`Flight`].
///
/// The last ticket dropped removes the flight from the map, including
/// when the owning future is cancelled mid-fetch.
struct FlightTicket<'a> {
    flights: &'a FlightMap,
    area_id: AreaId,
    flight: Arc<Flight>,
}

impl<'a> FlightTicket<'a> {
    fn join(flights: &'a FlightMap, area_id: &AreaId) -> Self {
        let mut map = flights.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = map.entry(area_id.clone()).or_insert_with(|| FlightEntry {
            flight: Arc::new(Flight::default()),
            tickets: 0,
        });
        entry.tickets += 1;
        let flight = entry.flight.clone();
        drop(map);

        Self {
            flights,
            area_id: area_id.clone(),
            flight,
        }
    }

    fn flight(&self) -> &Flight {
        &self.flight
    }
}

impl Drop for FlightTicket<'_> {
    fn drop(&mut self) {
        let mut map = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = map.get_mut(&self.area_id) {
            entry.tickets = entry.tickets.saturating_sub(1);
            if entry.tickets == 0 {
                map.remove(&self.area_id);
            }
        }
    }
}
