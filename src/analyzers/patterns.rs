//! Read-only analysis over stored daily summaries: routes that run late more
//! often than not, and a historical delay prediction for live trips.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Days, NaiveDate, Utc};
use tracing::{debug, info};

use crate::analyzers::types::{
    AnalysisPeriod, DailyDelaySummary, DelayPrediction, DelayedRoute, PatternReport,
};
use crate::analyzers::utility::{floor_mean, weighted_floor_mean};
use crate::config::{DELAY_THRESHOLD_SECONDS, DELAYED_ROUTE_FRACTION, TrackerConfig};
use crate::error::TrackerError;
use crate::live::LiveTripView;
use crate::schedule::Schedule;
use crate::service_time::wall_clock_to_service_time;
use crate::store::{LiveTripStore, SummaryStore};

/// The `days` completed service days before `today`: `[today - days, today - 1]`.
///
/// The current service day is left out since its summaries are only written
/// once it is over.
pub fn analysis_period(today: NaiveDate, days: i64) -> crate::error::Result<AnalysisPeriod> {
    let days = days.max(1);
    let out_of_range = || TrackerError::DateOutOfRange(today);
    let start_date = today
        .checked_sub_days(Days::new(days as u64))
        .ok_or_else(out_of_range)?;
    let end_date = today.checked_sub_days(Days::new(1)).ok_or_else(out_of_range)?;
    Ok(AnalysisPeriod {
        start_date,
        end_date,
        days,
    })
}

/// Groups trip-day summaries by route and keeps the routes where more than
/// half of the trip-days averaged over the delay threshold. Summaries of trips
/// missing from the schedule are ignored.
pub fn delayed_routes(schedule: &Schedule, summaries: &[DailyDelaySummary]) -> Vec<DelayedRoute> {
    let mut by_route: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for summary in summaries {
        if let Some(trip) = schedule.trip(&summary.trip_id) {
            by_route
                .entry(trip.route_id.as_str())
                .or_default()
                .push(summary.avg_delay_seconds);
        }
    }

    let mut routes: Vec<DelayedRoute> = by_route
        .into_iter()
        .filter_map(|(route_id, averages)| {
            let total = averages.len();
            let delayed = averages
                .iter()
                .filter(|avg| **avg > DELAY_THRESHOLD_SECONDS)
                .count();
            let fraction_delayed = delayed as f64 / total as f64;
            if fraction_delayed <= DELAYED_ROUTE_FRACTION {
                return None;
            }
            Some(DelayedRoute {
                route_id: route_id.to_string(),
                route_name: schedule.route_name(route_id).to_string(),
                fraction_delayed,
                average_delay_seconds: floor_mean(&averages)?,
                trip_days_analyzed: total,
            })
        })
        .collect();

    routes.sort_by(|a, b| {
        b.fraction_delayed
            .partial_cmp(&a.fraction_delayed)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.route_id.cmp(&b.route_id))
    });
    routes
}

/// Mean of a trip's daily averages weighted by their observation counts.
pub fn predict_from(summaries: &[DailyDelaySummary]) -> DelayPrediction {
    let pairs: Vec<(i64, i64)> = summaries
        .iter()
        .map(|s| (s.avg_delay_seconds, s.num_observations as i64))
        .collect();
    let days: BTreeSet<NaiveDate> = summaries.iter().map(|s| s.date).collect();

    DelayPrediction {
        predicted_delay_seconds: weighted_floor_mean(&pairs),
        confidence: days.len() as u32,
    }
}

pub struct PatternDetector<M> {
    schedule: Arc<Schedule>,
    summaries: Arc<M>,
    config: TrackerConfig,
}

impl<M: SummaryStore> PatternDetector<M> {
    pub fn new(schedule: Arc<Schedule>, summaries: Arc<M>, config: TrackerConfig) -> Self {
        Self {
            schedule,
            summaries,
            config,
        }
    }

    /// Trailing window of completed service days before the one `now` falls in.
    fn window(&self, now: DateTime<Utc>, days: i64) -> Result<AnalysisPeriod> {
        let tz = self.config.timezone(&self.schedule)?;
        let today = wall_clock_to_service_time(now, tz)?.service_date;
        Ok(analysis_period(today, days)?)
    }

    /// Delayed-route report over the configured lookback.
    pub async fn report(&self, now: DateTime<Utc>) -> Result<PatternReport> {
        self.report_over(now, self.config.lookback_days).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn report_over(&self, now: DateTime<Utc>, days: i64) -> Result<PatternReport> {
        let period = self.window(now, days)?;
        let summaries = self
            .summaries
            .summaries_between(period.start_date, period.end_date)
            .await?;
        let delayed_routes = delayed_routes(&self.schedule, &summaries);

        info!(
            start_date = %period.start_date,
            end_date = %period.end_date,
            trip_days = summaries.len(),
            delayed_routes = delayed_routes.len(),
            "Pattern report built"
        );

        Ok(PatternReport {
            delayed_routes,
            analysis_period: period,
        })
    }

    /// Historical delay prediction for one trip.
    pub async fn predict(&self, trip_id: &str, now: DateTime<Utc>) -> Result<DelayPrediction> {
        let period = self.window(now, self.config.lookback_days)?;
        let summaries = self
            .summaries
            .summaries_for_trip(trip_id, period.start_date, period.end_date)
            .await?;
        let prediction = predict_from(&summaries);
        debug!(
            trip_id,
            predicted = ?prediction.predicted_delay_seconds,
            confidence = prediction.confidence,
            "Delay predicted"
        );
        Ok(prediction)
    }

    /// Every live trip joined with its route, position and prediction,
    /// ordered by trip id.
    pub async fn live_views<L: LiveTripStore>(
        &self,
        live: &L,
        now: DateTime<Utc>,
    ) -> Result<Vec<LiveTripView>> {
        let mut trips = live.list().await?;
        trips.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));

        let mut views = Vec::with_capacity(trips.len());
        for trip in trips {
            let scheduled = self.schedule.trip(&trip.trip_id);
            let route_id = scheduled.map(|t| t.route_id.clone()).unwrap_or_default();
            let prediction = self.predict(&trip.trip_id, now).await?;

            views.push(LiveTripView {
                route_name: self.schedule.route_name(&route_id).to_string(),
                headsign: scheduled.and_then(|t| t.headsign.clone()),
                position: live.position(&trip.trip_id).await?,
                predicted_delay_seconds: prediction.predicted_delay_seconds,
                prediction_confidence: prediction.confidence,
                route_id,
                trip_id: trip.trip_id,
                service_date: trip.service_date,
                started_at: trip.started_at,
                last_observed_at: trip.last_observed_at,
                delay_seconds: trip.delay_seconds,
                confidence: trip.confidence,
            });
        }
        Ok(views)
    }
}
