//! Schedule fixtures shared by unit tests.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::schedule::{Agency, Route, Schedule, ScheduleSnapshot, ScheduleTrip, ScheduledStop};
use crate::service_time::{parse_schedule_time, service_time_to_wall_clock};

pub const TZ: Tz = chrono_tz::Asia::Kolkata;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

/// Wall-clock instant of `hms` on the service day `service_date` in [`TZ`].
pub fn at_service_time(service_date: NaiveDate, hms: &str) -> DateTime<Utc> {
    service_time_to_wall_clock(service_date, parse_schedule_time(hms).unwrap(), TZ).unwrap()
}

/// A trip whose stops are `(stop_id, arrival)`; departure is one minute later.
pub fn trip(trip_id: &str, route_id: &str, stops: &[(&str, &str)]) -> ScheduleTrip {
    ScheduleTrip {
        trip_id: trip_id.to_string(),
        route_id: route_id.to_string(),
        headsign: None,
        stops: stops
            .iter()
            .enumerate()
            .map(|(i, (stop_id, arrival))| {
                let arrival = parse_schedule_time(arrival).unwrap();
                ScheduledStop {
                    stop_id: stop_id.to_string(),
                    stop_sequence: i as u32 + 1,
                    arrival_seconds: arrival,
                    departure_seconds: arrival + 60,
                }
            })
            .collect(),
    }
}

pub fn route(route_id: &str, short_name: &str) -> Route {
    Route {
        route_id: route_id.to_string(),
        short_name: Some(short_name.to_string()),
        long_name: None,
    }
}

pub fn schedule(routes: Vec<Route>, trips: Vec<ScheduleTrip>) -> Schedule {
    Schedule::from_snapshot(ScheduleSnapshot {
        agencies: vec![Agency {
            agency_id: "A1".to_string(),
            name: "City Transit".to_string(),
            timezone: TZ.name().to_string(),
        }],
        routes,
        trips,
    })
}
