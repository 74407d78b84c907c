use std::hash::Hasher;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::models::{RouteSegment, StopRecord};

/// One fetch of the stop and route tables.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub stops: Vec<StopRecord>,
    pub routes: Vec<RouteSegment>,
}

/// Stop file: either a bare array or `{"checksum": .., "bus_stops": [..]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum StopsFile {
    Wrapped { bus_stops: Vec<StopRecord> },
    Bare(Vec<StopRecord>),
}

/// Route file: either a bare array or `{"checksum": .., "bus_routes": [..]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RoutesFile {
    Wrapped { bus_routes: Vec<RouteSegment> },
    Bare(Vec<RouteSegment>),
}

fn stop_code_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9]{5}$").unwrap())
}

fn service_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Za-z]+$").unwrap())
}

impl Dataset {
    pub fn new(stops: Vec<StopRecord>, routes: Vec<RouteSegment>) -> Self {
        Dataset { stops, routes }
    }

    /// Read the stop and route JSON files.
    pub fn load(stops_path: &Path, routes_path: &Path) -> Result<Self, DatasetError> {
        let stops_json = std::fs::read_to_string(stops_path)
            .map_err(|e| DatasetError::Io(format!("{}: {}", stops_path.display(), e)))?;
        let routes_json = std::fs::read_to_string(routes_path)
            .map_err(|e| DatasetError::Io(format!("{}: {}", routes_path.display(), e)))?;
        Self::from_json(&stops_json, &routes_json)
    }

    /// Parse stop and route tables from JSON strings.
    pub fn from_json(stops_json: &str, routes_json: &str) -> Result<Self, DatasetError> {
        let stops = match serde_json::from_str(stops_json)
            .map_err(|e| DatasetError::Parse(format!("stops: {}", e)))?
        {
            StopsFile::Wrapped { bus_stops } => bus_stops,
            StopsFile::Bare(stops) => stops,
        };
        let routes = match serde_json::from_str(routes_json)
            .map_err(|e| DatasetError::Parse(format!("routes: {}", e)))?
        {
            RoutesFile::Wrapped { bus_routes } => bus_routes,
            RoutesFile::Bare(routes) => routes,
        };
        Ok(Dataset { stops, routes })
    }

    /// Reject records the indexes cannot hold.
    ///
    /// Route segments may reference stop codes absent from the stop table;
    /// those are skipped at query time instead.
    pub fn validate(&self) -> Result<(), DatasetError> {
        for stop in &self.stops {
            if !stop_code_pattern().is_match(&stop.code) {
                return Err(DatasetError::InvalidStopCode(stop.code.clone()));
            }
            if !stop.coordinate().is_finite() {
                return Err(DatasetError::NonFiniteCoordinate(stop.code.clone()));
            }
        }
        for segment in &self.routes {
            if !service_pattern().is_match(segment.service_number.trim()) {
                return Err(DatasetError::InvalidServiceNumber(
                    segment.service_number.clone(),
                ));
            }
            if !matches!(segment.direction, 1 | 2) {
                return Err(DatasetError::InvalidDirection {
                    service: segment.service_number.clone(),
                    direction: segment.direction,
                });
            }
        }
        Ok(())
    }

    /// Fingerprint of the dataset: 32 hex digits, stops then routes.
    ///
    /// Records are hashed in order behind their count, so reordering,
    /// adding or removing records all change the result. Route order
    /// matters because routes keep the order they were supplied in.
    pub fn checksum(&self) -> String {
        let mut stops = seahash::SeaHasher::new();
        stops.write_u64(self.stops.len() as u64);
        for stop in &self.stops {
            stops.write(stop.code.as_bytes());
            stops.write_u8(0);
            stops.write(stop.road_name.as_bytes());
            stops.write_u8(0);
            stops.write(stop.description.as_bytes());
            stops.write_u8(0);
            stops.write_u64(stop.latitude.to_bits());
            stops.write_u64(stop.longitude.to_bits());
        }

        let mut routes = seahash::SeaHasher::new();
        routes.write_u64(self.routes.len() as u64);
        for seg in &self.routes {
            routes.write(seg.service_number.as_bytes());
            routes.write_u8(0);
            routes.write_u8(seg.direction);
            routes.write_u32(seg.sequence);
            routes.write(seg.stop_code.as_bytes());
            routes.write_u8(0);
        }

        format!("{:016x}{:016x}", stops.finish(), routes.finish())
    }
}

/// Reasons a dataset cannot become a snapshot.
#[derive(Debug)]
pub enum DatasetError {
    Io(String),
    Parse(String),
    InvalidStopCode(String),
    DuplicateStop(String),
    NonFiniteCoordinate(String),
    InvalidServiceNumber(String),
    InvalidDirection { service: String, direction: u8 },
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetError::Io(msg) => write!(f, "Dataset I/O error: {}", msg),
            DatasetError::Parse(msg) => write!(f, "Dataset parse error: {}", msg),
            DatasetError::InvalidStopCode(code) => write!(f, "Invalid stop code '{}'", code),
            DatasetError::DuplicateStop(code) => write!(f, "Duplicate stop code '{}'", code),
            DatasetError::NonFiniteCoordinate(code) => {
                write!(f, "Stop '{}' has a non-finite coordinate", code)
            }
            DatasetError::InvalidServiceNumber(service) => {
                write!(f, "Invalid service number '{}'", service)
            }
            DatasetError::InvalidDirection { service, direction } => {
                write!(f, "Service '{}' has invalid direction {}", service, direction)
            }
        }
    }
}

impl std::error::Error for DatasetError {}
