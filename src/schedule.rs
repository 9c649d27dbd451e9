//! Read-only static schedule: agency, routes and trips with ordered stop times.
//!
//! The schedule arrives already structured (one JSON snapshot produced by the
//! ingestion pipeline). Stop times are written as `HH:MM:SS` strings and held
//! in memory as seconds since the start of the service day.

use std::collections::HashMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::service_time::{format_schedule_time, parse_schedule_time};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agency {
    pub agency_id: String,
    pub name: String,
    /// IANA identifier, e.g. `"Asia/Kolkata"`.
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub route_id: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
}

impl Route {
    /// Display name: short name, then long name, then the id.
    pub fn display_name(&self) -> &str {
        self.short_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.long_name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(&self.route_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledStop {
    pub stop_id: String,
    pub stop_sequence: u32,
    #[serde(rename = "arrival_time", with = "schedule_time")]
    pub arrival_seconds: u32,
    #[serde(rename = "departure_time", with = "schedule_time")]
    pub departure_seconds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleTrip {
    pub trip_id: String,
    pub route_id: String,
    #[serde(default)]
    pub headsign: Option<String>,
    /// Sorted by `stop_sequence` once loaded.
    pub stops: Vec<ScheduledStop>,
}

impl ScheduleTrip {
    /// Stop with the lowest sequence number.
    pub fn first_stop(&self) -> Option<&ScheduledStop> {
        self.stops.iter().min_by_key(|s| s.stop_sequence)
    }

    /// Stop with the highest sequence number.
    pub fn last_stop(&self) -> Option<&ScheduledStop> {
        self.stops.iter().max_by_key(|s| s.stop_sequence)
    }

    /// First visit of `stop_id` along the trip.
    pub fn find_stop(&self, stop_id: &str) -> Option<&ScheduledStop> {
        self.stops.iter().find(|s| s.stop_id == stop_id)
    }
}

/// On-disk layout of a schedule snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    #[serde(default)]
    pub agencies: Vec<Agency>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub trips: Vec<ScheduleTrip>,
}

#[derive(Debug, Default)]
pub struct Schedule {
    agencies: Vec<Agency>,
    routes: HashMap<String, Route>,
    trips: HashMap<String, ScheduleTrip>,
}

impl Schedule {
    /// Loads a schedule snapshot from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read schedule snapshot '{path}'"))?;
        let snapshot: ScheduleSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("invalid schedule snapshot '{path}'"))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn from_snapshot(snapshot: ScheduleSnapshot) -> Self {
        let routes = snapshot
            .routes
            .into_iter()
            .map(|r| (r.route_id.clone(), r))
            .collect();

        let trips = snapshot
            .trips
            .into_iter()
            .map(|mut t| {
                t.stops.sort_by_key(|s| s.stop_sequence);
                (t.trip_id.clone(), t)
            })
            .collect();

        Self {
            agencies: snapshot.agencies,
            routes,
            trips,
        }
    }

    /// Timezone of the operating agency. Deployments serve a single agency,
    /// so the first one listed wins.
    pub fn agency_timezone(&self) -> Option<&str> {
        self.agencies.first().map(|a| a.timezone.as_str())
    }

    pub fn trip(&self, trip_id: &str) -> Option<&ScheduleTrip> {
        self.trips.get(trip_id)
    }

    pub fn trips(&self) -> impl Iterator<Item = &ScheduleTrip> {
        self.trips.values()
    }

    pub fn route(&self, route_id: &str) -> Option<&Route> {
        self.routes.get(route_id)
    }

    /// Display name for `route_id`, falling back to the id for unknown routes.
    pub fn route_name<'a>(&'a self, route_id: &'a str) -> &'a str {
        self.route(route_id)
            .map(Route::display_name)
            .unwrap_or(route_id)
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

mod schedule_time {
    use super::{Deserialize, Deserializer, Serializer, format_schedule_time, parse_schedule_time};

    pub fn serialize<S: Serializer>(seconds: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_schedule_time(*seconds))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_schedule_time(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = r#"{
        "agencies": [{"agency_id": "BMTC", "name": "Metro Bus", "timezone": "Asia/Kolkata"}],
        "routes": [
            {"route_id": "R1", "short_name": "500D", "long_name": "Hebbal - Silk Board"},
            {"route_id": "R2", "short_name": "", "long_name": "Airport Express"}
        ],
        "trips": [{
            "trip_id": "T1",
            "route_id": "R1",
            "stops": [
                {"stop_id": "S2", "stop_sequence": 2, "arrival_time": "25:25:00", "departure_time": "25:26:00"},
                {"stop_id": "S1", "stop_sequence": 1, "arrival_time": "25:00:00", "departure_time": "25:01:00"}
            ]
        }]
    }"#;

    fn schedule() -> Schedule {
        Schedule::from_snapshot(serde_json::from_str(SNAPSHOT).unwrap())
    }

    #[test]
    fn test_snapshot_parses_times_past_midnight() {
        let schedule = schedule();
        let trip = schedule.trip("T1").unwrap();
        assert_eq!(trip.stops[0].stop_id, "S1");
        assert_eq!(trip.first_stop().unwrap().departure_seconds, 90060);
        assert_eq!(trip.last_stop().unwrap().arrival_seconds, 91500);
    }

    #[test]
    fn test_invalid_time_rejects_snapshot() {
        let raw = SNAPSHOT.replace("25:25:00", "25:99:00");
        assert!(serde_json::from_str::<ScheduleSnapshot>(&raw).is_err());
    }

    #[test]
    fn test_route_names_fall_back() {
        let schedule = schedule();
        assert_eq!(schedule.route_name("R1"), "500D");
        assert_eq!(schedule.route_name("R2"), "Airport Express");
        assert_eq!(schedule.route_name("R9"), "R9");
    }

    #[test]
    fn test_agency_timezone() {
        assert_eq!(schedule().agency_timezone(), Some("Asia/Kolkata"));
        assert_eq!(Schedule::default().agency_timezone(), None);
    }

    #[test]
    fn test_find_stop() {
        let schedule = schedule();
        let trip = schedule.trip("T1").unwrap();
        assert_eq!(trip.find_stop("S2").unwrap().stop_sequence, 2);
        assert!(trip.find_stop("S9").is_none());
    }
}
