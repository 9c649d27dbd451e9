//! Periodic activation and retirement of live trips.
//!
//! Per schedule trip and service day the lifecycle is
//! `Scheduled -> Active -> Retired`. The activation pass moves trips departing
//! soon into `Active`; the retirement pass deletes live trips whose last
//! scheduled arrival is long enough in the past. A retired trip is not
//! activated again for the same service day.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Days, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::schedule::Schedule;
use crate::service_time::{
    SECONDS_PER_DAY, ServiceTime, format_schedule_time, service_time_to_wall_clock,
    wall_clock_to_service_time,
};
use crate::store::{Activation, LiveTripStore};

/// What one lifecycle run did (or, in dry-run mode, would have done).
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleReport {
    pub service_date: NaiveDate,
    pub service_seconds: u32,
    pub activated: Vec<String>,
    pub retired: Vec<String>,
    pub dry_run: bool,
}

pub struct TripLifecycleManager<L> {
    schedule: Arc<Schedule>,
    live: Arc<L>,
    config: TrackerConfig,
    running: Mutex<()>,
}

impl<L: LiveTripStore> TripLifecycleManager<L> {
    pub fn new(schedule: Arc<Schedule>, live: Arc<L>, config: TrackerConfig) -> Self {
        Self {
            schedule,
            live,
            config,
            running: Mutex::new(()),
        }
    }

    /// Runs the activation pass then the retirement pass.
    ///
    /// Returns `Ok(None)` without doing anything if another run of this
    /// manager is still in progress.
    ///
    /// # Errors
    ///
    /// Fails before touching any live trip if the deployment timezone is
    /// missing or invalid.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(
        &self,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Option<LifecycleReport>> {
        let Ok(_running) = self.running.try_lock() else {
            warn!("Previous lifecycle run still in progress, skipping");
            return Ok(None);
        };

        let tz = self.config.timezone(&self.schedule)?;
        let current = wall_clock_to_service_time(now, tz)?;
        info!(
            service_date = %current.service_date,
            service_time = %format_schedule_time(current.seconds),
            "Lifecycle run"
        );

        let activated = self.activate_upcoming(current, now, dry_run).await?;
        let retired = self.retire_finished(tz, now, dry_run).await?;

        info!(
            activated = activated.len(),
            retired = retired.len(),
            dry_run,
            "Lifecycle run complete"
        );

        Ok(Some(LifecycleReport {
            service_date: current.service_date,
            service_seconds: current.seconds,
            activated,
            retired,
            dry_run,
        }))
    }

    /// Makes live every trip whose first departure lies within the lookahead
    /// window and that is neither live nor retired for its service day.
    async fn activate_upcoming(
        &self,
        current: ServiceTime,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<Vec<String>> {
        let lookahead = self.config.lookahead_minutes * 60;

        // The same instant read on the next service day's clock, so trips
        // opening the next service day are picked up before 03:00.
        let mut windows = vec![(current.service_date, i64::from(current.seconds))];
        if let Some(next_date) = current.service_date.checked_add_days(Days::new(1)) {
            windows.push((next_date, i64::from(current.seconds) - i64::from(SECONDS_PER_DAY)));
        }

        let mut candidates: Vec<(&str, NaiveDate, u32)> = Vec::new();
        for trip in self.schedule.trips() {
            let Some(first) = trip.first_stop() else {
                continue;
            };
            let departure = i64::from(first.departure_seconds);
            if let Some((date, _)) = windows
                .iter()
                .find(|(_, start)| *start <= departure && departure <= start + lookahead)
            {
                candidates.push((trip.trip_id.as_str(), *date, first.departure_seconds));
            }
        }
        candidates.sort();
        debug!(candidates = candidates.len(), lookahead, "Activation candidates");

        let mut activated = Vec::new();
        for (trip_id, service_date, departure) in candidates {
            if dry_run {
                // same decision as `activate`, without the write
                let would_activate = match self.live.get(trip_id).await? {
                    Some(existing) if existing.service_date >= service_date => false,
                    _ => !self.live.is_retired(trip_id, service_date).await?,
                };
                if would_activate {
                    info!(trip_id, %service_date, departs = %format_schedule_time(departure), "[dry run] Would activate");
                    activated.push(trip_id.to_string());
                }
                continue;
            }

            match self.live.activate(trip_id, service_date, now).await? {
                Activation::Created(_) => {
                    info!(trip_id, %service_date, departs = %format_schedule_time(departure), "Activated trip");
                    activated.push(trip_id.to_string());
                }
                Activation::Replaced { stale, .. } => {
                    warn!(
                        trip_id,
                        stale_date = %stale.service_date,
                        %service_date,
                        "Replaced live trip never retired on its service day"
                    );
                    activated.push(trip_id.to_string());
                }
                Activation::Existing(_) => {}
                Activation::Retired => {
                    debug!(trip_id, %service_date, "Trip already retired for this service day");
                }
            }
        }

        Ok(activated)
    }

    /// Retires live trips whose last scheduled arrival is more than
    /// `cleanup_minutes` before `now`.
    async fn retire_finished(&self, tz: Tz, now: DateTime<Utc>, dry_run: bool) -> Result<Vec<String>> {
        let threshold = now - Duration::minutes(self.config.cleanup_minutes);
        let mut retired = Vec::new();

        for live in self.live.list().await? {
            let finished = match self.schedule.trip(&live.trip_id).and_then(|t| t.last_stop()) {
                Some(last) => {
                    let ends_at = service_time_to_wall_clock(live.service_date, last.arrival_seconds, tz)?;
                    ends_at < threshold
                }
                None => {
                    warn!(trip_id = %live.trip_id, "Live trip has no scheduled stops, retiring");
                    true
                }
            };

            if !finished {
                continue;
            }

            if dry_run {
                info!(trip_id = %live.trip_id, "[dry run] Would retire");
                retired.push(live.trip_id);
                continue;
            }

            if self.live.retire(&live.trip_id, live.service_date).await? {
                info!(trip_id = %live.trip_id, service_date = %live.service_date, "Retired trip");
                retired.push(live.trip_id);
            }
        }

        Ok(retired)
    }
}
