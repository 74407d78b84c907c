use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::models::{Coordinate, Direction, StopRecord};
use crate::transit::dataset::{Dataset, DatasetError};
use crate::transit::registry::StopRegistry;
use crate::transit::routes::RouteIndex;
use crate::transit::spatial::{Neighbor, SpatialIndex};

/// All indexes built from one dataset. Never mutated after construction.
#[derive(Debug)]
pub struct Snapshot {
    registry: StopRegistry,
    routes: RouteIndex,
    spatial: SpatialIndex,
    checksum: String,
    loaded_at: chrono::DateTime<chrono::Utc>,
}

impl Snapshot {
    /// Validate a dataset and build every index over it.
    pub fn build(dataset: &Dataset) -> Result<Self, DatasetError> {
        dataset.validate()?;

        let stops: Vec<Arc<StopRecord>> = dataset.stops.iter().cloned().map(Arc::new).collect();
        let registry = StopRegistry::build(&stops)?;
        let routes = RouteIndex::build(&dataset.routes)?;
        let spatial = SpatialIndex::build(stops);

        Ok(Snapshot {
            registry,
            routes,
            spatial,
            checksum: dataset.checksum(),
            loaded_at: chrono::Utc::now(),
        })
    }

    /// A snapshot with no stops or routes; every query comes back empty.
    pub fn empty() -> Self {
        Snapshot {
            registry: StopRegistry::default(),
            routes: RouteIndex::default(),
            spatial: SpatialIndex::default(),
            checksum: Dataset::default().checksum(),
            loaded_at: chrono::Utc::now(),
        }
    }

    pub fn nearest(&self, origin: Coordinate, k: usize) -> Vec<Neighbor> {
        self.spatial.nearest(origin, k)
    }

    pub fn nearest_stops(&self, origin: Coordinate, k: usize) -> Vec<Arc<StopRecord>> {
        self.spatial.k_nearest(origin, k)
    }

    pub fn stop_by_code(&self, code: &str) -> Option<Arc<StopRecord>> {
        self.registry.get(code.trim())
    }

    pub fn route_stops(&self, service: &str, direction: Direction) -> Option<Vec<Arc<StopRecord>>> {
        self.routes.stops(&self.registry, service, direction)
    }

    pub fn search_stops_by_tokens<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<Arc<StopRecord>> {
        self.registry.search_by_tokens(tokens)
    }

    pub fn stop_count(&self) -> usize {
        self.registry.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn loaded_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.loaded_at
    }
}

/// Result of a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Replaced { stops: usize, routes: usize },
    /// The dataset matched the live snapshot's checksum; nothing was rebuilt.
    Unchanged,
}

/// Why a refresh did not replace the live snapshot.
#[derive(Debug)]
pub enum RefreshError {
    InProgress,
    Dataset(DatasetError),
}

impl std::fmt::Display for RefreshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshError::InProgress => write!(f, "A refresh is already in progress"),
            RefreshError::Dataset(e) => write!(f, "Refresh aborted: {}", e),
        }
    }
}

impl std::error::Error for RefreshError {}

impl From<DatasetError> for RefreshError {
    fn from(e: DatasetError) -> Self {
        RefreshError::Dataset(e)
    }
}

/// The claimed refresh slot of a [`TransitService`].
///
/// Owned, so it can be held across an upstream fetch and moved onto the
/// blocking pool. Dropping it releases the slot, however the refresh ends.
#[derive(Debug)]
pub struct RefreshGuard(Arc<AtomicBool>);

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Query interface over the live snapshot.
///
/// Queries load the current snapshot lock-free via ArcSwap. A refresh builds
/// a complete new snapshot off to the side and swaps it in atomically;
/// queries already holding the old one finish against it.
pub struct TransitService {
    snapshot: ArcSwap<Snapshot>,
    refreshing: Arc<AtomicBool>,
}

impl TransitService {
    pub fn new(dataset: &Dataset) -> Result<Self, DatasetError> {
        let snapshot = Snapshot::build(dataset)?;
        info!(
            "[REFRESH] Initial snapshot: {} stops, {} routes",
            snapshot.stop_count(),
            snapshot.route_count()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn empty() -> Self {
        Self::from_snapshot(Snapshot::empty())
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        TransitService {
            snapshot: ArcSwap::from_pointee(snapshot),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The live snapshot, for callers that need several consistent queries.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Nearest `k` stops to `origin`, nearest first.
    pub fn nearest_stops(&self, origin: Coordinate, k: usize) -> Vec<Arc<StopRecord>> {
        self.snapshot.load().nearest_stops(origin, k)
    }

    pub fn stop_by_code(&self, code: &str) -> Option<Arc<StopRecord>> {
        self.snapshot.load().stop_by_code(code)
    }

    pub fn route_stops(&self, service: &str, direction: Direction) -> Option<Vec<Arc<StopRecord>>> {
        self.snapshot.load().route_stops(service, direction)
    }

    pub fn search_stops_by_tokens<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<Arc<StopRecord>> {
        self.snapshot.load().search_stops_by_tokens(tokens)
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Claim the single refresh slot.
    ///
    /// Hold the guard for the whole refresh, including fetching the
    /// dataset, then pass it to [`TransitService::apply_refresh`].
    pub fn try_begin_refresh(&self) -> Result<RefreshGuard, RefreshError> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RefreshGuard(Arc::clone(&self.refreshing)))
            .map_err(|_| RefreshError::InProgress)
    }

    /// Rebuild all indexes from `dataset` and swap them in.
    ///
    /// Only one refresh runs at a time; a concurrent call gets
    /// `RefreshError::InProgress`. An invalid dataset leaves the live
    /// snapshot untouched.
    pub fn refresh(&self, dataset: &Dataset) -> Result<RefreshOutcome, RefreshError> {
        let guard = self.try_begin_refresh()?;
        self.apply_refresh(&guard, dataset)
    }

    /// Like [`TransitService::refresh`] with the slot already claimed.
    pub fn apply_refresh(&self, guard: &RefreshGuard, dataset: &Dataset) -> Result<RefreshOutcome, RefreshError> {
        debug_assert!(Arc::ptr_eq(&guard.0, &self.refreshing), "guard from another service");

        if dataset.checksum() == self.snapshot.load().checksum() {
            info!("[REFRESH] Dataset unchanged, keeping current snapshot");
            return Ok(RefreshOutcome::Unchanged);
        }

        let started = Instant::now();
        let snapshot = Snapshot::build(dataset).map_err(|e| {
            warn!("[REFRESH] Rejected new dataset: {}", e);
            RefreshError::Dataset(e)
        })?;

        if snapshot.stop_count() == 0 {
            warn!("[REFRESH] New dataset has no stops; nearest queries will be empty");
        }

        let outcome = RefreshOutcome::Replaced {
            stops: snapshot.stop_count(),
            routes: snapshot.route_count(),
        };
        self.snapshot.store(Arc::new(snapshot));

        info!(
            "[REFRESH] Snapshot replaced in {:.1}ms: {:?}",
            started.elapsed().as_secs_f64() * 1000.0,
            outcome
        );
        Ok(outcome)
    }
}
