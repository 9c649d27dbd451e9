//! Crowdsourced sighting events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the reporter saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SightingKind {
    WaitingAtStop,
    OnBus,
    BusPassed,
    BusArrived,
    NoShow,
    Rerouted,
    Breakdown,
    Heartbeat,
}

impl fmt::Display for SightingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SightingKind::WaitingAtStop => "waiting_at_stop",
            SightingKind::OnBus => "on_bus",
            SightingKind::BusPassed => "bus_passed",
            SightingKind::BusArrived => "bus_arrived",
            SightingKind::NoShow => "no_show",
            SightingKind::Rerouted => "rerouted",
            SightingKind::Breakdown => "breakdown",
            SightingKind::Heartbeat => "heartbeat",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// A single immutable report. Fields are flat so a sighting maps onto one
/// row of the sighting log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    pub reporter_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: SightingKind,
    pub trip_id: Option<String>,
    pub stop_id: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub notes: Option<String>,
}

impl Sighting {
    pub fn new(reporter_id: &str, timestamp: DateTime<Utc>, kind: SightingKind) -> Self {
        Sighting {
            reporter_id: reporter_id.to_string(),
            timestamp,
            kind,
            trip_id: None,
            stop_id: None,
            lat: None,
            lon: None,
            notes: None,
        }
    }

    pub fn with_trip(mut self, trip_id: &str) -> Self {
        self.trip_id = Some(trip_id.to_string());
        self
    }

    pub fn with_stop(mut self, stop_id: &str) -> Self {
        self.stop_id = Some(stop_id.to_string());
        self
    }

    pub fn with_coordinate(mut self, lat: f64, lon: f64) -> Self {
        self.lat = Some(lat);
        self.lon = Some(lon);
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    /// Both halves of the coordinate, if the reporter shared a location.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinate { lat, lon }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&SightingKind::WaitingAtStop).unwrap();
        assert_eq!(json, "\"waiting_at_stop\"");
        let kind: SightingKind = serde_json::from_str("\"no_show\"").unwrap();
        assert_eq!(kind, SightingKind::NoShow);
        assert_eq!(SightingKind::BusArrived.to_string(), "bus_arrived");
    }

    #[test]
    fn test_coordinate_requires_both_halves() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 10, 3, 0, 0).unwrap();
        let mut s = Sighting::new("u1", ts, SightingKind::OnBus);
        assert!(s.coordinate().is_none());
        s.lat = Some(12.97);
        assert!(s.coordinate().is_none());
        let s = s.with_coordinate(12.97, 77.59);
        assert_eq!(s.coordinate(), Some(Coordinate { lat: 12.97, lon: 77.59 }));
    }
}
