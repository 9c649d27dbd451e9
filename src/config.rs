//! Deployment configuration and the fixed tuning constants of the tracker.

use chrono_tz::Tz;

use crate::error::{Result, TrackerError};
use crate::schedule::Schedule;
use crate::service_time::resolve_timezone;

/// Sightings needed in the confidence window for full confidence.
pub const CONFIDENCE_SATURATION_COUNT: usize = 5;

/// Trailing window of sightings counted towards confidence.
pub const CONFIDENCE_WINDOW_MINUTES: i64 = 15;

/// A trip-day averaging more than this is counted as delayed.
pub const DELAY_THRESHOLD_SECONDS: i64 = 300;

/// A route is flagged once more than this share of its trip-days are delayed.
pub const DELAYED_ROUTE_FRACTION: f64 = 0.5;

pub const DEFAULT_LOOKAHEAD_MINUTES: i64 = 15;
pub const DEFAULT_CLEANUP_MINUTES: i64 = 30;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
pub const DEFAULT_LIFECYCLE_PERIOD_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// IANA timezone of the operating authority. Falls back to the
    /// schedule's agency timezone when unset.
    pub timezone: Option<String>,
    pub lookahead_minutes: i64,
    pub cleanup_minutes: i64,
    pub lookback_days: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            lookahead_minutes: DEFAULT_LOOKAHEAD_MINUTES,
            cleanup_minutes: DEFAULT_CLEANUP_MINUTES,
            lookback_days: DEFAULT_LOOKBACK_DAYS,
        }
    }
}

impl TrackerConfig {
    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = Some(timezone.to_string());
        self
    }

    /// The deployment timezone: configured value first, then the agency's.
    pub fn timezone(&self, schedule: &Schedule) -> Result<Tz> {
        match self
            .timezone
            .as_deref()
            .filter(|tz| !tz.trim().is_empty())
            .or(schedule.agency_timezone())
        {
            Some(name) => resolve_timezone(name),
            None => Err(TrackerError::MissingTimezone),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Agency, ScheduleSnapshot};

    fn schedule_with_agency(tz: &str) -> Schedule {
        Schedule::from_snapshot(ScheduleSnapshot {
            agencies: vec![Agency {
                agency_id: "A".to_string(),
                name: "Agency".to_string(),
                timezone: tz.to_string(),
            }],
            ..Default::default()
        })
    }

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.lookahead_minutes, 15);
        assert_eq!(config.cleanup_minutes, 30);
        assert_eq!(config.lookback_days, 7);
    }

    #[test]
    fn test_configured_timezone_wins() {
        let config = TrackerConfig::default().with_timezone("Europe/Berlin");
        let tz = config.timezone(&schedule_with_agency("Asia/Kolkata")).unwrap();
        assert_eq!(tz, chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_falls_back_to_agency_timezone() {
        let tz = TrackerConfig::default()
            .timezone(&schedule_with_agency("Asia/Kolkata"))
            .unwrap();
        assert_eq!(tz, chrono_tz::Asia::Kolkata);
    }

    #[test]
    fn test_missing_timezone() {
        let result = TrackerConfig::default().timezone(&Schedule::default());
        assert!(matches!(result, Err(TrackerError::MissingTimezone)));
    }
}
