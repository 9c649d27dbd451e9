use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{Activation, LiveTripStore, SightingStore, SummaryStore, Upsert};
use crate::analyzers::types::DailyDelaySummary;
use crate::error::TrackerError;
use crate::live::{LivePosition, LiveTrip};
use crate::sighting::Sighting;

#[derive(Debug, Default)]
struct LiveState {
    trips: HashMap<String, LiveTrip>,
    positions: HashMap<String, LivePosition>,
    /// Service date each trip was last retired for.
    retired: HashMap<String, NaiveDate>,
}

/// Serialized form of a [`MemoryStore`]. Sightings are not part of it; the
/// sighting log is their durable home.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateSnapshot {
    #[serde(default)]
    live_trips: Vec<LiveTrip>,
    #[serde(default)]
    positions: Vec<LivePosition>,
    #[serde(default)]
    retired: HashMap<String, NaiveDate>,
    #[serde(default)]
    summaries: Vec<DailyDelaySummary>,
}

/// In-process store for live state, summaries and (for tests and one-off
/// runs) sightings.
#[derive(Debug, Default)]
pub struct MemoryStore {
    live: RwLock<LiveState>,
    summaries: RwLock<HashMap<(String, NaiveDate), DailyDelaySummary>>,
    sightings: RwLock<Vec<Sighting>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores live state and summaries from a JSON snapshot. A missing file
    /// yields an empty store.
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            debug!(path, "No state snapshot found, starting empty");
            return Ok(Self::new());
        }

        let file = File::open(path).with_context(|| format!("failed to open state '{path}'"))?;
        let snapshot: StateSnapshot = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid state snapshot '{path}'"))?;

        let live = LiveState {
            trips: snapshot
                .live_trips
                .into_iter()
                .map(|t| (t.trip_id.clone(), t))
                .collect(),
            positions: snapshot
                .positions
                .into_iter()
                .map(|p| (p.trip_id.clone(), p))
                .collect(),
            retired: snapshot.retired,
        };
        let summaries = snapshot
            .summaries
            .into_iter()
            .map(|s| ((s.trip_id.clone(), s.date), s))
            .collect();

        Ok(Self {
            live: RwLock::new(live),
            summaries: RwLock::new(summaries),
            sightings: RwLock::new(Vec::new()),
        })
    }

    /// Writes live state and summaries to `path`, replacing it atomically.
    pub async fn save(&self, path: &str) -> Result<()> {
        let snapshot = {
            let live = self.live.read().await;
            let summaries = self.summaries.read().await;
            let mut summaries: Vec<_> = summaries.values().cloned().collect();
            summaries.sort_by(|a, b| (a.date, &a.trip_id).cmp(&(b.date, &b.trip_id)));
            StateSnapshot {
                live_trips: live.trips.values().cloned().collect(),
                positions: live.positions.values().cloned().collect(),
                retired: live.retired.clone(),
                summaries,
            }
        };

        if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp_path = format!("{path}.tmp");
        {
            let file = File::create(&tmp_path)?;
            serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)?;
        }
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to replace state '{path}'"))?;

        debug!(path, live_trips = snapshot.live_trips.len(), "State snapshot saved");
        Ok(())
    }
}

#[async_trait]
impl SightingStore for MemoryStore {
    async fn record(&self, sighting: &Sighting) -> Result<()> {
        self.sightings.write().await.push(sighting.clone());
        Ok(())
    }

    async fn count_for_trip(
        &self,
        trip_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<usize> {
        let sightings = self.sightings.read().await;
        Ok(sightings
            .iter()
            .filter(|s| s.trip_id.as_deref() == Some(trip_id))
            .filter(|s| s.timestamp >= from && s.timestamp <= to)
            .count())
    }

    async fn with_trip_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sighting>> {
        let sightings = self.sightings.read().await;
        Ok(sightings
            .iter()
            .filter(|s| s.trip_id.is_some())
            .filter(|s| s.timestamp >= from && s.timestamp < to)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LiveTripStore for MemoryStore {
    async fn activate(
        &self,
        trip_id: &str,
        service_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Activation> {
        let mut live = self.live.write().await;

        if let Some(existing) = live.trips.get(trip_id) {
            if existing.service_date >= service_date {
                return Ok(Activation::Existing(existing.clone()));
            }
        }
        if live.retired.get(trip_id) == Some(&service_date) {
            return Ok(Activation::Retired);
        }

        let trip = LiveTrip::new(trip_id, service_date, now);
        let stale = live.trips.insert(trip_id.to_string(), trip.clone());
        Ok(match stale {
            Some(stale) => {
                live.positions.remove(trip_id);
                live.retired.insert(trip_id.to_string(), stale.service_date);
                Activation::Replaced { stale, trip }
            }
            None => Activation::Created(trip),
        })
    }

    async fn get(&self, trip_id: &str) -> Result<Option<LiveTrip>> {
        Ok(self.live.read().await.trips.get(trip_id).cloned())
    }

    async fn list(&self) -> Result<Vec<LiveTrip>> {
        let live = self.live.read().await;
        let mut trips: Vec<_> = live.trips.values().cloned().collect();
        trips.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
        Ok(trips)
    }

    async fn update(&self, trip: &LiveTrip) -> Result<()> {
        let mut live = self.live.write().await;
        match live.trips.get_mut(&trip.trip_id) {
            Some(slot) => {
                *slot = trip.clone();
                Ok(())
            }
            None => Err(TrackerError::TripNotLive(trip.trip_id.clone()).into()),
        }
    }

    async fn upsert_position(&self, position: &LivePosition) -> Result<()> {
        let mut live = self.live.write().await;
        if !live.trips.contains_key(&position.trip_id) {
            return Err(TrackerError::TripNotLive(position.trip_id.clone()).into());
        }
        live.positions
            .insert(position.trip_id.clone(), position.clone());
        Ok(())
    }

    async fn position(&self, trip_id: &str) -> Result<Option<LivePosition>> {
        Ok(self.live.read().await.positions.get(trip_id).cloned())
    }

    async fn retire(&self, trip_id: &str, service_date: NaiveDate) -> Result<bool> {
        let mut live = self.live.write().await;
        let removed = live.trips.remove(trip_id).is_some();
        live.positions.remove(trip_id);
        if removed {
            live.retired.insert(trip_id.to_string(), service_date);
        }
        Ok(removed)
    }

    async fn is_retired(&self, trip_id: &str, service_date: NaiveDate) -> Result<bool> {
        Ok(self.live.read().await.retired.get(trip_id) == Some(&service_date))
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn upsert_summary(&self, summary: &DailyDelaySummary) -> Result<Upsert> {
        let mut summaries = self.summaries.write().await;
        let key = (summary.trip_id.clone(), summary.date);
        Ok(match summaries.insert(key, summary.clone()) {
            Some(_) => Upsert::Updated,
            None => Upsert::Created,
        })
    }

    async fn summaries_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyDelaySummary>> {
        let summaries = self.summaries.read().await;
        let mut rows: Vec<_> = summaries
            .values()
            .filter(|s| s.date >= from && s.date <= to)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.date, &a.trip_id).cmp(&(b.date, &b.trip_id)));
        Ok(rows)
    }

    async fn summaries_for_trip(
        &self,
        trip_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyDelaySummary>> {
        let summaries = self.summaries.read().await;
        let mut rows: Vec<_> = summaries
            .values()
            .filter(|s| s.trip_id == trip_id && s.date >= from && s.date <= to)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.date);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::env;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 10, 3, 0, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap()
    }

    fn position(trip_id: &str, seq: u32) -> LivePosition {
        LivePosition {
            trip_id: trip_id.to_string(),
            last_stop_sequence: seq,
            progress_ratio: 0.0,
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn test_activate_is_unique() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.activate("T1", day(10), now()).await.unwrap(),
            Activation::Created(_)
        ));
        assert!(matches!(
            store.activate("T1", day(10), now()).await.unwrap(),
            Activation::Existing(_)
        ));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retire_removes_position_and_blocks_same_day() {
        let store = MemoryStore::new();
        store.activate("T1", day(10), now()).await.unwrap();
        store.upsert_position(&position("T1", 3)).await.unwrap();

        assert!(store.retire("T1", day(10)).await.unwrap());
        assert!(store.get("T1").await.unwrap().is_none());
        assert!(store.position("T1").await.unwrap().is_none());
        assert!(!store.retire("T1", day(10)).await.unwrap());

        assert_eq!(
            store.activate("T1", day(10), now()).await.unwrap(),
            Activation::Retired
        );
        assert!(matches!(
            store.activate("T1", day(11), now()).await.unwrap(),
            Activation::Created(_)
        ));
    }

    #[tokio::test]
    async fn test_activation_replaces_trip_left_from_earlier_day() {
        let store = MemoryStore::new();
        store.activate("T1", day(10), now()).await.unwrap();
        store.upsert_position(&position("T1", 3)).await.unwrap();
        let mut stale = store.get("T1").await.unwrap().unwrap();
        stale.delay_seconds = 600;
        store.update(&stale).await.unwrap();

        // asking for an earlier day leaves the live trip alone
        assert!(matches!(
            store.activate("T1", day(9), now()).await.unwrap(),
            Activation::Existing(t) if t.service_date == day(10)
        ));

        match store.activate("T1", day(11), now()).await.unwrap() {
            Activation::Replaced { stale, trip } => {
                assert_eq!(stale.service_date, day(10));
                assert_eq!(stale.delay_seconds, 600);
                assert_eq!(trip.service_date, day(11));
                assert_eq!(trip.delay_seconds, 0);
            }
            other => panic!("expected replacement, got {other:?}"),
        }
        assert_eq!(store.get("T1").await.unwrap().unwrap().service_date, day(11));
        assert!(store.position("T1").await.unwrap().is_none());
        assert!(store.is_retired("T1", day(10)).await.unwrap());
        assert!(!store.is_retired("T1", day(11)).await.unwrap());
    }

    #[tokio::test]
    async fn test_is_retired_is_per_service_day() {
        let store = MemoryStore::new();
        assert!(!store.is_retired("T1", day(10)).await.unwrap());
        store.activate("T1", day(10), now()).await.unwrap();
        store.retire("T1", day(10)).await.unwrap();
        assert!(store.is_retired("T1", day(10)).await.unwrap());
        assert!(!store.is_retired("T1", day(11)).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_and_position_require_live_trip() {
        let store = MemoryStore::new();
        let trip = LiveTrip::new("T9", day(10), now());
        let err = store.update(&trip).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrackerError>(),
            Some(TrackerError::TripNotLive(id)) if id == "T9"
        ));
        assert!(store.upsert_position(&position("T9", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_summary_upsert_overwrites() {
        let store = MemoryStore::new();
        let mut summary = DailyDelaySummary {
            trip_id: "T1".to_string(),
            date: day(9),
            avg_delay_seconds: 120,
            num_observations: 3,
        };
        assert_eq!(store.upsert_summary(&summary).await.unwrap(), Upsert::Created);
        summary.avg_delay_seconds = 60;
        assert_eq!(store.upsert_summary(&summary).await.unwrap(), Upsert::Updated);

        let rows = store.summaries_between(day(1), day(10)).await.unwrap();
        assert_eq!(rows, vec![summary]);
        assert!(store.summaries_between(day(10), day(12)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let path = format!("{}/crowd_tracker_state_test.json", env::temp_dir().display());
        let _ = std::fs::remove_file(&path);

        let store = MemoryStore::new();
        store.activate("T1", day(10), now()).await.unwrap();
        store.upsert_position(&position("T1", 2)).await.unwrap();
        store.activate("T2", day(10), now()).await.unwrap();
        store.retire("T2", day(10)).await.unwrap();
        store
            .upsert_summary(&DailyDelaySummary {
                trip_id: "T1".to_string(),
                date: day(9),
                avg_delay_seconds: -30,
                num_observations: 2,
            })
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let restored = MemoryStore::load(&path).unwrap();
        assert_eq!(restored.get("T1").await.unwrap(), store.get("T1").await.unwrap());
        assert_eq!(restored.position("T1").await.unwrap().unwrap().last_stop_sequence, 2);
        assert_eq!(
            restored.activate("T2", day(10), now()).await.unwrap(),
            Activation::Retired
        );
        assert_eq!(restored.summaries_for_trip("T1", day(1), day(10)).await.unwrap().len(), 1);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let path = format!("{}/crowd_tracker_state_missing.json", env::temp_dir().display());
        let _ = std::fs::remove_file(&path);
        assert!(MemoryStore::load(&path).is_ok());
    }
}
