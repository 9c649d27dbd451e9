//! Live tracking records and the view handed to API consumers.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Real-time state of one schedule trip that is currently in service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveTrip {
    pub trip_id: String,
    /// Service date the trip was activated for.
    pub service_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    /// Positive means late.
    pub delay_seconds: i64,
    /// In `[0, 1]`.
    pub confidence: f64,
}

impl LiveTrip {
    pub fn new(trip_id: &str, service_date: NaiveDate, now: DateTime<Utc>) -> Self {
        LiveTrip {
            trip_id: trip_id.to_string(),
            service_date,
            started_at: now,
            last_observed_at: now,
            delay_seconds: 0,
            confidence: 0.0,
        }
    }
}

/// Last stop reached by a live trip. Lives and dies with its [`LiveTrip`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePosition {
    pub trip_id: String,
    pub last_stop_sequence: u32,
    /// Progress towards the next stop. Always 0.0 after an at-stop sighting.
    pub progress_ratio: f64,
    pub updated_at: DateTime<Utc>,
}

/// Live trip joined with its schedule details, position and prediction.
#[derive(Debug, Clone, Serialize)]
pub struct LiveTripView {
    pub trip_id: String,
    pub route_id: String,
    pub route_name: String,
    pub headsign: Option<String>,
    pub service_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub delay_seconds: i64,
    pub confidence: f64,
    pub position: Option<LivePosition>,
    pub predicted_delay_seconds: Option<i64>,
    pub prediction_confidence: u32,
}
