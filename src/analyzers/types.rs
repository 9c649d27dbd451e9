//! Data types produced by the aggregation and pattern pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Average delay of one trip over one service day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyDelaySummary {
    pub trip_id: String,
    pub date: NaiveDate,
    /// Floor of the mean delay of the day's sightings.
    pub avg_delay_seconds: i64,
    pub num_observations: usize,
}

/// A route whose trip-days are delayed more often than not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelayedRoute {
    pub route_id: String,
    pub route_name: String,
    pub fraction_delayed: f64,
    pub average_delay_seconds: i64,
    pub trip_days_analyzed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i64,
}

/// Delayed-route report served to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    pub delayed_routes: Vec<DelayedRoute>,
    pub analysis_period: AnalysisPeriod,
}

/// Historical prediction for a live trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DelayPrediction {
    /// `None` when no summaries fall inside the window.
    pub predicted_delay_seconds: Option<i64>,
    /// Distinct days with a summary in the window.
    pub confidence: u32,
}

/// Outcome of one run of the historical aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    pub date: NaiveDate,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sightings_considered: usize,
    pub trips_summarized: usize,
    pub created: usize,
    pub updated: usize,
    pub dry_run: bool,
}
