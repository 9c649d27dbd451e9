use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::SightingStore;
use crate::sighting::Sighting;

/// Append-only CSV file of sightings, one row per sighting.
///
/// Rows already on disk are read once on open and kept in memory for the
/// window queries; every new sighting is flushed to disk before `record`
/// returns.
pub struct CsvSightingLog {
    path: String,
    rows: Mutex<Vec<Sighting>>,
}

impl CsvSightingLog {
    /// Opens (or lazily creates) the log at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let rows = load_rows(path)?;
        info!(path, rows = rows.len(), "Sighting log opened");
        Ok(Self {
            path: path.to_string(),
            rows: Mutex::new(rows),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl SightingStore for CsvSightingLog {
    async fn record(&self, sighting: &Sighting) -> Result<()> {
        let mut rows = self.rows.lock().await;
        append_record(&self.path, sighting)?;
        rows.push(sighting.clone());
        Ok(())
    }

    async fn count_for_trip(
        &self,
        trip_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<usize> {
        let rows = self.rows.lock().await;
        Ok(rows
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
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|s| s.trip_id.is_some())
            .filter(|s| s.timestamp >= from && s.timestamp < to)
            .cloned()
            .collect())
    }

    async fn refresh(&self) -> Result<()> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        *rows = load_rows(&self.path)?;
        debug!(path = %self.path, before, after = rows.len(), "Sighting log reloaded");
        Ok(())
    }
}

/// Reads every sighting row from a CSV file. A missing file has no rows.
pub fn load_rows(path: &str) -> Result<Vec<Sighting>> {
    if !Path::new(path).exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).with_context(|| format!("failed to open sighting log '{path}'"))?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut rows = Vec::new();

    for result in rdr.deserialize() {
        let record: Sighting = result.with_context(|| format!("bad row in '{path}'"))?;
        rows.push(record);
    }

    Ok(rows)
}

/// Appends a [`Sighting`] as a row, writing the header only when the file is new.
pub fn append_record(path: &str, sighting: &Sighting) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending sighting");

    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);

    writer.serialize(sighting)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sighting::SightingKind;
    use chrono::{Duration, TimeZone};
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 10, 3, minute, 0).unwrap()
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let path = temp_path("crowd_tracker_log_header.csv");
        let _ = fs::remove_file(&path);

        let sighting = Sighting::new("u1", at(0), SightingKind::OnBus);
        append_record(&path, &sighting).unwrap();
        append_record(&path, &sighting).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("reporter_id,"));

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_log_survives_reopen() {
        let path = temp_path("crowd_tracker_log_reopen.csv");
        let _ = fs::remove_file(&path);

        let log = CsvSightingLog::open(&path).unwrap();
        let full = Sighting::new("u1", at(5), SightingKind::BusArrived)
            .with_trip("T1")
            .with_stop("S1")
            .with_coordinate(12.97, 77.59)
            .with_notes("crowded, standing room only");
        log.record(&full).await.unwrap();
        log.record(&Sighting::new("u2", at(6), SightingKind::Heartbeat))
            .await
            .unwrap();

        let reopened = CsvSightingLog::open(&path).unwrap();
        assert_eq!(reopened.len().await, 2);
        let with_trip = reopened
            .with_trip_between(at(0), at(0) + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(with_trip, vec![full]);

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_refresh_sees_rows_from_another_writer() {
        let path = temp_path("crowd_tracker_log_refresh.csv");
        let _ = fs::remove_file(&path);

        let reader = CsvSightingLog::open(&path).unwrap();
        let writer = CsvSightingLog::open(&path).unwrap();
        writer
            .record(&Sighting::new("u1", at(5), SightingKind::OnBus).with_trip("T2"))
            .await
            .unwrap();

        let window = (at(0), at(0) + Duration::hours(1));
        assert!(reader.with_trip_between(window.0, window.1).await.unwrap().is_empty());
        reader.refresh().await.unwrap();
        assert_eq!(reader.with_trip_between(window.0, window.1).await.unwrap().len(), 1);
        assert_eq!(reader.len().await, 1);

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_count_window_is_inclusive() {
        let path = temp_path("crowd_tracker_log_window.csv");
        let _ = fs::remove_file(&path);

        let log = CsvSightingLog::open(&path).unwrap();
        for minute in [0, 10, 20] {
            log.record(&Sighting::new("u", at(minute), SightingKind::OnBus).with_trip("T1"))
                .await
                .unwrap();
        }
        assert_eq!(log.count_for_trip("T1", at(5), at(20)).await.unwrap(), 2);
        assert_eq!(log.count_for_trip("T2", at(0), at(20)).await.unwrap(), 0);

        fs::remove_file(&path).unwrap();
    }
}
