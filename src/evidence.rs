//! Turns individual sightings into live delay and confidence estimates.
//!
//! Handling a sighting has two phases. The sighting is first written to the
//! sighting store; only once that succeeds are the live-state side effects
//! applied. Side-effect failures are logged and reported in the returned
//! [`ProcessOutcome`] but never undo or retry the recorded sighting.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::config::{CONFIDENCE_SATURATION_COUNT, CONFIDENCE_WINDOW_MINUTES};
use crate::live::LivePosition;
use crate::schedule::{Schedule, ScheduleTrip};
use crate::service_time::{seconds_into_service_day, wall_clock_to_service_time};
use crate::sighting::Sighting;
use crate::store::{Activation, LiveTripStore, SightingStore};

/// Delay observed at a scheduled stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopDelay {
    pub stop_sequence: u32,
    /// Positive means late.
    pub delay_seconds: i64,
}

/// Delay implied by a sighting at one of the trip's stops, measured on the
/// clock of `service_date`, the service day the trip runs on. A sighting at
/// 02:58 of a trip activated early for the next service day is therefore read
/// as -420 s against a 03:05 arrival, not as the previous day's 26:58.
///
/// `None` if the sighting names no stop or the stop is not on the trip.
pub fn observed_delay(
    sighting: &Sighting,
    trip: &ScheduleTrip,
    service_date: NaiveDate,
    tz: Tz,
) -> crate::error::Result<Option<StopDelay>> {
    let Some(stop) = sighting
        .stop_id
        .as_deref()
        .and_then(|stop_id| trip.find_stop(stop_id))
    else {
        return Ok(None);
    };

    let actual = seconds_into_service_day(sighting.timestamp, service_date, tz)?;
    Ok(Some(StopDelay {
        stop_sequence: stop.stop_sequence,
        delay_seconds: actual - i64::from(stop.arrival_seconds),
    }))
}

/// Confidence from the number of recent corroborating sightings: linear up to
/// [`CONFIDENCE_SATURATION_COUNT`], then 1.0.
pub fn confidence_for(recent_sightings: usize) -> f64 {
    (recent_sightings as f64 / CONFIDENCE_SATURATION_COUNT as f64).min(1.0)
}

/// What phase two did with a sighting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// No trip reference, nothing to update.
    NoTrip,
    /// Trip reference not found in the schedule.
    UnknownTrip,
    /// Trip already retired for the current service day.
    Retired,
    Updated {
        delay_seconds: i64,
        confidence: f64,
        /// Sequence of the matched stop, if any.
        stop_sequence: Option<u32>,
    },
    Failed {
        reason: String,
    },
}

pub struct EvidenceProcessor<S, L> {
    schedule: Arc<Schedule>,
    sightings: Arc<S>,
    live: Arc<L>,
    tz: Tz,
    trip_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: SightingStore, L: LiveTripStore> EvidenceProcessor<S, L> {
    pub fn new(schedule: Arc<Schedule>, sightings: Arc<S>, live: Arc<L>, tz: Tz) -> Self {
        Self {
            schedule,
            sightings,
            live,
            tz,
            trip_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Durably records the sighting, then applies its side effects.
    ///
    /// # Errors
    ///
    /// Only a failure to record the sighting is returned as an error.
    pub async fn record_and_process(
        &self,
        sighting: &Sighting,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        self.sightings
            .record(sighting)
            .await
            .context("failed to record sighting")?;
        Ok(self.process(sighting, now).await)
    }

    /// Applies the live-state side effects of an already recorded sighting.
    #[tracing::instrument(
        skip(self, sighting, now),
        fields(reporter = %sighting.reporter_id, kind = %sighting.kind, trip_id = ?sighting.trip_id)
    )]
    pub async fn process(&self, sighting: &Sighting, now: DateTime<Utc>) -> ProcessOutcome {
        let Some(trip_id) = sighting.trip_id.as_deref() else {
            debug!("Sighting has no trip reference");
            return ProcessOutcome::NoTrip;
        };

        match self.apply(trip_id, sighting, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Failed to apply sighting to live trip");
                ProcessOutcome::Failed {
                    reason: format!("{e:#}"),
                }
            }
        }
    }

    async fn apply(
        &self,
        trip_id: &str,
        sighting: &Sighting,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        let Some(trip) = self.schedule.trip(trip_id) else {
            warn!("Sighting references a trip missing from the schedule");
            return Ok(ProcessOutcome::UnknownTrip);
        };

        let lock = self.trip_lock(trip_id).await;
        let _guard = lock.lock().await;

        let service_date = wall_clock_to_service_time(now, self.tz)?.service_date;
        let mut live = match self.live.activate(trip_id, service_date, now).await? {
            Activation::Created(live) => {
                debug!(%service_date, "Live trip created by sighting");
                live
            }
            Activation::Replaced { stale, trip } => {
                debug!(stale_date = %stale.service_date, %service_date, "Replaced live trip left from an earlier service day");
                trip
            }
            Activation::Existing(live) => live,
            Activation::Retired => {
                debug!(%service_date, "Trip already retired, ignoring sighting");
                return Ok(ProcessOutcome::Retired);
            }
        };

        live.last_observed_at = now;

        let stop_delay = observed_delay(sighting, trip, live.service_date, self.tz)?;
        match (&sighting.stop_id, stop_delay) {
            (_, Some(observed)) => live.delay_seconds = observed.delay_seconds,
            (Some(stop_id), None) => {
                debug!(stop_id, "Stop is not on the trip, delay unchanged");
            }
            (None, None) => {}
        }

        let window_start = now - Duration::minutes(CONFIDENCE_WINDOW_MINUTES);
        let recent = self
            .sightings
            .count_for_trip(trip_id, window_start, now)
            .await?;
        live.confidence = confidence_for(recent);

        self.live.update(&live).await?;

        if let Some(observed) = stop_delay {
            self.live
                .upsert_position(&LivePosition {
                    trip_id: trip_id.to_string(),
                    last_stop_sequence: observed.stop_sequence,
                    progress_ratio: 0.0,
                    updated_at: now,
                })
                .await?;
        }

        debug!(
            delay_seconds = live.delay_seconds,
            confidence = live.confidence,
            recent,
            "Live trip updated"
        );

        Ok(ProcessOutcome::Updated {
            delay_seconds: live.delay_seconds,
            confidence: live.confidence,
            stop_sequence: stop_delay.map(|d| d.stop_sequence),
        })
    }

    /// Per-trip lock serializing updates to one live trip. Locks nobody else
    /// holds are dropped from the map on the way.
    async fn trip_lock(&self, trip_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.trip_locks.lock().await;
        locks.retain(|id, lock| id == trip_id || Arc::strong_count(lock) > 1);
        locks
            .entry(trip_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
