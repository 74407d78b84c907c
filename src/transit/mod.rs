//! Static stop and route data: nearest-stop search, code lookup, route
//! resolution and description search over one dataset snapshot.

pub mod dataset;
pub mod registry;
pub mod routes;
pub mod search;
pub mod service;
pub mod spatial;

pub use dataset::{Dataset, DatasetError};
pub use service::{RefreshError, RefreshGuard, RefreshOutcome, Snapshot, TransitService};
pub use spatial::{geodesic_distance, Neighbor, SpatialIndex};
