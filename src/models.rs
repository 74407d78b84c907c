use std::fmt;

use serde::{Deserialize, Serialize};

/// A point on the Earth's surface in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Coordinate { latitude, longitude }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Convert to a `geo` point (x = longitude, y = latitude).
    pub fn to_point(self) -> geo::Point<f64> {
        geo::Point::new(self.longitude, self.latitude)
    }
}

/// A physical bus stop, as published by the upstream dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopRecord {
    #[serde(rename = "BusStopCode")]
    pub code: String,
    pub road_name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl StopRecord {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Travel direction of a bus service. Loop services only have `One`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    One,
    Two,
}

impl Direction {
    pub fn as_u8(self) -> u8 {
        match self {
            Direction::One => 1,
            Direction::Two => 2,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Direction::One),
            2 => Ok(Direction::Two),
            other => Err(other),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// One stop along one direction of a bus service.
///
/// Schedule fields published alongside (first/last bus, distance) are
/// ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteSegment {
    #[serde(rename = "ServiceNo")]
    pub service_number: String,
    pub direction: u8,
    #[serde(rename = "StopSequence")]
    pub sequence: u32,
    #[serde(rename = "BusStopCode")]
    pub stop_code: String,
}

/// A single upcoming bus for a service at a stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NextBus {
    pub origin_code: String,
    pub destination_code: String,
    /// RFC 3339 timestamp, or empty when no bus is scheduled.
    pub estimated_arrival: String,
    pub load: String,
    pub feature: String,
    #[serde(rename = "Type")]
    pub bus_type: String,
}

/// Live arrivals for one service at a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceArrival {
    #[serde(rename = "ServiceNo")]
    pub service_number: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub next_bus: NextBus,
    #[serde(default)]
    pub next_bus2: NextBus,
    #[serde(default)]
    pub next_bus3: NextBus,
}

impl ServiceArrival {
    /// Minutes until each of the next three buses (None where unscheduled).
    pub fn minutes_until(&self, now: chrono::DateTime<chrono::Utc>) -> [Option<i64>; 3] {
        [
            arrival_minutes(&self.next_bus.estimated_arrival, now),
            arrival_minutes(&self.next_bus2.estimated_arrival, now),
            arrival_minutes(&self.next_bus3.estimated_arrival, now),
        ]
    }
}

/// Whole minutes from `now` until `estimated_arrival`, clamped at zero.
///
/// Returns None for an empty or unparseable timestamp.
pub fn arrival_minutes(estimated_arrival: &str, now: chrono::DateTime<chrono::Utc>) -> Option<i64> {
    if estimated_arrival.is_empty() {
        return None;
    }
    let arrival = chrono::DateTime::parse_from_rfc3339(estimated_arrival).ok()?;
    let seconds = (arrival.timestamp() - now.timestamp()).max(0);
    Some(seconds / 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> chrono::DateTime<chrono::Utc> {
        // 2024-11-26T14:00:00Z == 22:00 +08:00
        chrono::Utc.with_ymd_and_hms(2024, 11, 26, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_arrival_minutes_future() {
        assert_eq!(arrival_minutes("2024-11-26T22:04:48+08:00", now()), Some(4));
    }

    #[test]
    fn test_arrival_minutes_past_clamps_to_zero() {
        assert_eq!(arrival_minutes("2024-11-26T21:58:00+08:00", now()), Some(0));
    }

    #[test]
    fn test_arrival_minutes_empty() {
        assert_eq!(arrival_minutes("", now()), None);
        assert_eq!(arrival_minutes("not a time", now()), None);
    }

    #[test]
    fn test_direction_conversion() {
        assert_eq!(Direction::try_from(1), Ok(Direction::One));
        assert_eq!(Direction::try_from(2), Ok(Direction::Two));
        assert_eq!(Direction::try_from(3), Err(3));
        assert_eq!(Direction::Two.to_string(), "2");
    }

    #[test]
    fn test_stop_record_deserialize() {
        let json = r#"{
            "BusStopCode": "45029",
            "RoadName": "Woodlands Rd",
            "Description": "Opp Heavy Veh Pk",
            "Latitude": 1.39303959514259,
            "Longitude": 103.75414864750223
        }"#;
        let stop: StopRecord = serde_json::from_str(json).unwrap();
        assert_eq!(stop.code, "45029");
        assert_eq!(stop.road_name, "Woodlands Rd");
        assert!(stop.coordinate().is_finite());
    }

    #[test]
    fn test_stop_record_missing_field_rejected() {
        let json = r#"{"BusStopCode": "45029", "RoadName": "Woodlands Rd"}"#;
        assert!(serde_json::from_str::<StopRecord>(json).is_err());
    }

    #[test]
    fn test_route_segment_ignores_schedule_fields() {
        let json = r#"{
            "ServiceNo": "67",
            "Operator": "SBST",
            "Direction": 1,
            "StopSequence": 3,
            "BusStopCode": "44009",
            "Distance": 1.2,
            "WD_FirstBus": "0530"
        }"#;
        let seg: RouteSegment = serde_json::from_str(json).unwrap();
        assert_eq!(seg.service_number, "67");
        assert_eq!(seg.direction, 1);
        assert_eq!(seg.sequence, 3);
    }

    #[test]
    fn test_service_arrival_minutes() {
        let json = r#"{
            "ServiceNo": "67",
            "Operator": "SBST",
            "NextBus": {"EstimatedArrival": "2024-11-26T22:04:48+08:00"},
            "NextBus2": {"EstimatedArrival": "2024-11-26T22:15:00+08:00"},
            "NextBus3": {"EstimatedArrival": ""}
        }"#;
        let arrival: ServiceArrival = serde_json::from_str(json).unwrap();
        assert_eq!(arrival.minutes_until(now()), [Some(4), Some(15), None]);
    }
}
