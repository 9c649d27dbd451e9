use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::analyzers::types::DailyDelaySummary;
use crate::analyzers::utility::floor_mean;
use crate::evidence::observed_delay;
use crate::schedule::Schedule;
use crate::sighting::Sighting;

/// Folds one service day's sightings into a [`DailyDelaySummary`] per trip.
///
/// Sightings without a stop, for trips missing from the schedule, or at a
/// stop the trip does not serve contribute nothing. Output is ordered by
/// trip id.
pub fn aggregate_day(
    date: NaiveDate,
    sightings: &[Sighting],
    schedule: &Schedule,
    tz: Tz,
) -> Vec<DailyDelaySummary> {
    let mut delays: BTreeMap<&str, Vec<i64>> = BTreeMap::new();

    for sighting in sightings {
        let Some(trip) = sighting.trip_id.as_deref().and_then(|id| schedule.trip(id)) else {
            continue;
        };

        match observed_delay(sighting, trip, date, tz) {
            Ok(Some(observed)) => delays
                .entry(trip.trip_id.as_str())
                .or_default()
                .push(observed.delay_seconds),
            Ok(None) => {}
            Err(e) => {
                warn!(trip_id = %trip.trip_id, error = %e, "Could not compute delay for sighting");
            }
        }
    }

    debug!(%date, trips = delays.len(), "Delays grouped by trip");

    delays
        .into_iter()
        .filter_map(|(trip_id, values)| {
            Some(DailyDelaySummary {
                trip_id: trip_id.to_string(),
                date,
                avg_delay_seconds: floor_mean(&values)?,
                num_observations: values.len(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sighting::SightingKind;
    use crate::test_support::{at_service_time, date, schedule, trip, TZ};

    fn sighting(trip_id: Option<&str>, stop_id: Option<&str>, hms: &str) -> Sighting {
        let mut s = Sighting::new("rider", at_service_time(date(2024, 2, 9), hms), SightingKind::BusPassed);
        s.trip_id = trip_id.map(str::to_string);
        s.stop_id = stop_id.map(str::to_string);
        s
    }

    #[test]
    fn test_aggregate_floors_average_per_trip() {
        let schedule = schedule(
            vec![],
            vec![
                trip("T1", "R1", &[("A", "08:00:00"), ("B", "08:10:00")]),
                trip("T2", "R1", &[("A", "25:00:00")]),
            ],
        );
        let sightings = vec![
            sighting(Some("T1"), Some("A"), "08:02:00"),
            sighting(Some("T1"), Some("B"), "08:13:21"),
            sighting(Some("T2"), Some("A"), "24:59:00"),
            // skipped: no stop, stop off the trip, unknown trip
            sighting(Some("T1"), None, "08:05:00"),
            sighting(Some("T1"), Some("Z"), "08:05:00"),
            sighting(Some("T9"), Some("A"), "08:05:00"),
            sighting(None, Some("A"), "08:05:00"),
        ];

        let summaries = aggregate_day(date(2024, 2, 9), &sightings, &schedule, TZ);
        assert_eq!(
            summaries,
            vec![
                DailyDelaySummary {
                    trip_id: "T1".to_string(),
                    date: date(2024, 2, 9),
                    // (120 + 201) / 2 = 160.5
                    avg_delay_seconds: 160,
                    num_observations: 2,
                },
                DailyDelaySummary {
                    trip_id: "T2".to_string(),
                    date: date(2024, 2, 9),
                    avg_delay_seconds: -60,
                    num_observations: 1,
                },
            ]
        );
    }

    #[test]
    fn test_aggregate_empty_day() {
        let schedule = schedule(vec![], vec![]);
        assert!(aggregate_day(date(2024, 2, 9), &[], &schedule, TZ).is_empty());
    }
}
