use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyzers::aggregate::aggregate_day;
use crate::analyzers::types::AggregationReport;
use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::schedule::Schedule;
use crate::service_time::{service_day_window, wall_clock_to_service_time};
use crate::store::{SightingStore, SummaryStore, Upsert};

/// The service day before the one `now` falls in.
pub fn default_target_date(now: DateTime<Utc>, tz: Tz) -> crate::error::Result<NaiveDate> {
    let today = wall_clock_to_service_time(now, tz)?.service_date;
    today
        .checked_sub_days(Days::new(1))
        .ok_or(TrackerError::DateOutOfRange(today))
}

/// Daily batch job turning one service day of sightings into per-trip
/// delay summaries.
pub struct HistoricalAggregator<S, M> {
    schedule: Arc<Schedule>,
    sightings: Arc<S>,
    summaries: Arc<M>,
    config: TrackerConfig,
    running: Mutex<()>,
}

impl<S: SightingStore, M: SummaryStore> HistoricalAggregator<S, M> {
    pub fn new(
        schedule: Arc<Schedule>,
        sightings: Arc<S>,
        summaries: Arc<M>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            schedule,
            sightings,
            summaries,
            config,
            running: Mutex::new(()),
        }
    }

    /// Aggregates yesterday's service day.
    pub async fn run(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
        cancel: &AtomicBool,
    ) -> Result<Option<AggregationReport>> {
        let tz = self.config.timezone(&self.schedule)?;
        let date = default_target_date(now, tz)?;
        self.run_for_date(date, dry_run, cancel).await
    }

    /// Summarizes the sightings of service day `date` and upserts one summary
    /// per trip, replacing whatever an earlier run stored for that day.
    ///
    /// Returns `Ok(None)` if another run of this aggregator is in progress.
    /// `cancel` is checked between per-trip upserts.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn run_for_date(
        &self,
        date: NaiveDate,
        dry_run: bool,
        cancel: &AtomicBool,
    ) -> Result<Option<AggregationReport>> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Previous aggregation still in progress, skipping");
            return Ok(None);
        };

        let tz = self.config.timezone(&self.schedule)?;
        let (window_start, window_end) = service_day_window(date, tz)?;
        info!(%window_start, %window_end, "Aggregating service day");

        self.sightings
            .refresh()
            .await
            .context("failed to refresh sighting store")?;
        let sightings = self
            .sightings
            .with_trip_between(window_start, window_end)
            .await
            .context("failed to load sightings for aggregation")?;
        let summaries = aggregate_day(date, &sightings, &self.schedule, tz);
        debug!(
            sightings = sightings.len(),
            trips = summaries.len(),
            "Sightings aggregated"
        );

        let mut report = AggregationReport {
            date,
            window_start,
            window_end,
            sightings_considered: sightings.len(),
            trips_summarized: summaries.len(),
            created: 0,
            updated: 0,
            dry_run,
        };

        for summary in &summaries {
            if dry_run {
                info!(
                    trip_id = %summary.trip_id,
                    avg_delay_seconds = summary.avg_delay_seconds,
                    num_observations = summary.num_observations,
                    "[dry run] Would store summary"
                );
                continue;
            }

            if cancel.load(Ordering::Relaxed) {
                warn!(
                    stored = report.created + report.updated,
                    remaining = summaries.len() - report.created - report.updated,
                    "Aggregation cancelled"
                );
                bail!("aggregation for {date} cancelled");
            }

            match self
                .summaries
                .upsert_summary(summary)
                .await
                .with_context(|| format!("failed to store summary for trip {}", summary.trip_id))?
            {
                Upsert::Created => report.created += 1,
                Upsert::Updated => report.updated += 1,
            }
        }

        info!(
            sightings = report.sightings_considered,
            created = report.created,
            updated = report.updated,
            dry_run,
            "Aggregation complete"
        );

        Ok(Some(report))
    }
}
