use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::models::{Direction, RouteSegment, StopRecord};
use crate::transit::dataset::DatasetError;
use crate::transit::registry::StopRegistry;

/// Normalize a service number for lookup ("67a" → "67A").
pub fn normalize_service(service: &str) -> String {
    service.trim().to_uppercase()
}

/// Immutable (service, direction) → ordered stop codes map.
#[derive(Debug, Default)]
pub struct RouteIndex {
    routes: HashMap<(String, Direction), Vec<String>>,
}

impl RouteIndex {
    /// Group segments by service and direction, keeping the order in which
    /// they were supplied.
    pub fn build(segments: &[RouteSegment]) -> Result<Self, DatasetError> {
        let mut routes: HashMap<(String, Direction), Vec<String>> = HashMap::new();
        for segment in segments {
            let direction = Direction::try_from(segment.direction).map_err(|d| {
                DatasetError::InvalidDirection {
                    service: segment.service_number.clone(),
                    direction: d,
                }
            })?;
            routes
                .entry((normalize_service(&segment.service_number), direction))
                .or_default()
                .push(segment.stop_code.clone());
        }
        Ok(RouteIndex { routes })
    }

    /// Stop codes for a service in one direction, falling back to direction
    /// one when the requested direction does not exist.
    pub fn stop_codes(&self, service: &str, direction: Direction) -> Option<&[String]> {
        let service = normalize_service(service);
        self.routes
            .get(&(service.clone(), direction))
            .or_else(|| self.routes.get(&(service, Direction::One)))
            .map(Vec::as_slice)
    }

    /// Resolve a route to stop records. Codes missing from the registry are
    /// skipped.
    pub fn stops(
        &self,
        registry: &StopRegistry,
        service: &str,
        direction: Direction,
    ) -> Option<Vec<Arc<StopRecord>>> {
        let codes = self.stop_codes(service, direction)?;
        let stops: Vec<Arc<StopRecord>> = codes.iter().filter_map(|c| registry.get(c)).collect();
        if stops.len() < codes.len() {
            debug!(
                "Route {} dir {}: {} unknown stop codes skipped",
                service,
                direction,
                codes.len() - stops.len()
            );
        }
        Some(stops)
    }

    /// Number of (service, direction) routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Directions available for a service.
    pub fn directions(&self, service: &str) -> Vec<Direction> {
        let service = normalize_service(service);
        [Direction::One, Direction::Two]
            .into_iter()
            .filter(|d| self.routes.contains_key(&(service.clone(), *d)))
            .collect()
    }
}
