//! Conversion between wall-clock instants and the schedule's service-day clock.
//!
//! A service day starts at 03:00 local time, so an instant at 01:30 belongs to
//! the previous calendar day's service day at offset `25:30:00` (91 800 s).
//! Schedule times are stored as seconds since local midnight of the service
//! date and may exceed 86 400.

use std::fmt;

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::error::{Result, TrackerError};

/// Local hour at which a new service day begins.
pub const SERVICE_DAY_START_HOUR: u32 = 3;

pub const SECONDS_PER_DAY: u32 = 86_400;

/// A position on the service-day clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ServiceTime {
    pub service_date: NaiveDate,
    pub seconds: u32,
}

impl fmt::Display for ServiceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.service_date,
            format_schedule_time(self.seconds)
        )
    }
}

/// Parses an IANA timezone identifier such as `"Asia/Kolkata"`.
pub fn resolve_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TrackerError::UnknownTimezone(name.to_string()))
}

/// Maps a wall-clock instant onto the service day it belongs to.
pub fn wall_clock_to_service_time(timestamp: DateTime<Utc>, tz: Tz) -> Result<ServiceTime> {
    let local = timestamp.with_timezone(&tz);
    let seconds_into_day = local.hour() * 3600 + local.minute() * 60 + local.second();
    let calendar_date = local.date_naive();

    if local.hour() < SERVICE_DAY_START_HOUR {
        let service_date = calendar_date
            .checked_sub_days(Days::new(1))
            .ok_or(TrackerError::DateOutOfRange(calendar_date))?;
        Ok(ServiceTime {
            service_date,
            seconds: SECONDS_PER_DAY + seconds_into_day,
        })
    } else {
        Ok(ServiceTime {
            service_date: calendar_date,
            seconds: seconds_into_day,
        })
    }
}

/// Local midnight of `service_date` plus `seconds`, as a UTC instant.
///
/// The offset is added as an absolute duration, so `25:30:00` rolls into the
/// next calendar day. An ambiguous midnight resolves to its earliest mapping.
pub fn service_time_to_wall_clock(
    service_date: NaiveDate,
    seconds: u32,
    tz: Tz,
) -> Result<DateTime<Utc>> {
    let midnight = localize(service_date, NaiveTime::MIN, tz)?;
    Ok(midnight + Duration::seconds(i64::from(seconds)))
}

/// Seconds from local midnight of `service_date` to `timestamp`, on the same
/// absolute-duration clock as [`service_time_to_wall_clock`]. Negative before
/// that midnight.
pub fn seconds_into_service_day(
    timestamp: DateTime<Utc>,
    service_date: NaiveDate,
    tz: Tz,
) -> Result<i64> {
    let midnight = service_time_to_wall_clock(service_date, 0, tz)?;
    Ok((timestamp - midnight).num_seconds())
}

/// UTC bounds `[start, end)` of a full service day: 03:00 local on
/// `service_date` up to 03:00 local on the following date.
pub fn service_day_window(
    service_date: NaiveDate,
    tz: Tz,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let day_start = NaiveTime::from_hms_opt(SERVICE_DAY_START_HOUR, 0, 0)
        .ok_or(TrackerError::DateOutOfRange(service_date))?;
    let next_date = service_date
        .checked_add_days(Days::new(1))
        .ok_or(TrackerError::DateOutOfRange(service_date))?;

    let start = localize(service_date, day_start, tz)?;
    let end = localize(next_date, day_start, tz)?;
    Ok((start, end))
}

fn localize(date: NaiveDate, time: NaiveTime, tz: Tz) -> Result<DateTime<Utc>> {
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TrackerError::NonexistentLocalTime(naive, tz.name().to_string()))
}

/// Parses a schedule time such as `"08:30:00"` or `"25:30:00"` into seconds.
///
/// Hours are unbounded; minutes and seconds must be below 60.
pub fn parse_schedule_time(value: &str) -> Result<u32> {
    let invalid = || TrackerError::InvalidScheduleTime(value.to_string());

    let mut parts = value.trim().split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let hours: u32 = h.parse().map_err(|_| invalid())?;
    let minutes: u32 = m.parse().map_err(|_| invalid())?;
    let seconds: u32 = s.parse().map_err(|_| invalid())?;

    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }

    hours
        .checked_mul(3600)
        .and_then(|total| total.checked_add(minutes * 60 + seconds))
        .ok_or_else(invalid)
}

/// Formats seconds since service-day midnight as `HH:MM:SS` (hours may exceed 23).
pub fn format_schedule_time(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}
