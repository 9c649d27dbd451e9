//! Typed errors raised by the tracking core.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// No timezone configured and none available from the schedule's agency.
    #[error("deployment timezone is not configured")]
    MissingTimezone,

    #[error("unknown IANA timezone '{0}'")]
    UnknownTimezone(String),

    #[error("invalid schedule time '{0}', expected HH:MM:SS")]
    InvalidScheduleTime(String),

    #[error("local time {0} does not exist in timezone {1}")]
    NonexistentLocalTime(NaiveDateTime, String),

    #[error("service date {0} is out of range")]
    DateOutOfRange(NaiveDate),

    /// The live trip was retired (or never activated) before the write.
    #[error("trip '{0}' is not live")]
    TripNotLive(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
