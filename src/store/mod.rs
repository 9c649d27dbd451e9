//! Storage seams for sightings, live trip state and daily summaries.
//!
//! The relational store is an external collaborator; these traits describe
//! what the core needs from it. [`MemoryStore`] keeps live state and summaries
//! in process (snapshotted to JSON between runs), [`CsvSightingLog`] is an
//! append-only sighting log and [`SightingInbox`] queues sightings for the
//! process that owns the live state.

mod csv_log;
mod inbox;
mod memory;

pub use csv_log::{CsvSightingLog, load_rows as read_sightings_csv};
pub use inbox::SightingInbox;
pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::analyzers::types::DailyDelaySummary;
use crate::live::{LivePosition, LiveTrip};
use crate::sighting::Sighting;

/// Durable, append-only sighting storage.
#[async_trait]
pub trait SightingStore: Send + Sync {
    /// Appends a sighting. Once this returns `Ok` the sighting is retained.
    async fn record(&self, sighting: &Sighting) -> Result<()>;

    /// Number of sightings for `trip_id` with a timestamp in `[from, to]`.
    async fn count_for_trip(
        &self,
        trip_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<usize>;

    /// Sightings carrying a trip reference with a timestamp in `[from, to)`.
    async fn with_trip_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sighting>>;

    /// Picks up sightings other writers added to the backing storage since
    /// the store was opened. Stores that are always current need not override.
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}

/// Result of asking the store to make a trip live.
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Created(LiveTrip),
    Existing(LiveTrip),
    /// A live trip left over from an earlier service date was retired for
    /// that date and a fresh one created in its place.
    Replaced { stale: LiveTrip, trip: LiveTrip },
    /// Already retired for this service date; not brought back.
    Retired,
}

/// Live trips and their positions. A trip owns its position.
#[async_trait]
pub trait LiveTripStore: Send + Sync {
    /// Atomically creates the live trip unless one exists for `service_date`
    /// or a later date, or it was retired for `service_date`. A live trip
    /// from an earlier date is replaced.
    async fn activate(
        &self,
        trip_id: &str,
        service_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Activation>;

    async fn get(&self, trip_id: &str) -> Result<Option<LiveTrip>>;

    async fn list(&self) -> Result<Vec<LiveTrip>>;

    /// Overwrites an existing live trip. Fails if it is no longer live.
    async fn update(&self, trip: &LiveTrip) -> Result<()>;

    /// Creates or replaces the position of a live trip. Fails if the owning
    /// trip is no longer live.
    async fn upsert_position(&self, position: &LivePosition) -> Result<()>;

    async fn position(&self, trip_id: &str) -> Result<Option<LivePosition>>;

    /// Deletes the trip and its position in one step and remembers that the
    /// trip is retired for `service_date`. Returns `false` if it was not live.
    async fn retire(&self, trip_id: &str, service_date: NaiveDate) -> Result<bool>;

    /// Whether the trip was retired for `service_date`. Read only.
    async fn is_retired(&self, trip_id: &str, service_date: NaiveDate) -> Result<bool>;
}

/// Whether an upsert created a new row or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Daily delay summaries keyed by `(trip_id, date)`.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn upsert_summary(&self, summary: &DailyDelaySummary) -> Result<Upsert>;

    /// Summaries with `from <= date <= to`.
    async fn summaries_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyDelaySummary>>;

    async fn summaries_for_trip(
        &self,
        trip_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyDelaySummary>>;
}
