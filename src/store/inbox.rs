use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::csv_log::{append_record, load_rows};
use crate::sighting::Sighting;

/// CSV drop file that producers append sightings to while the tracker runs.
///
/// Only the process that owns live state drains it. A batch is claimed by
/// renaming the file aside, so rows appended during a drain land in a fresh
/// file and are picked up on the next pass.
pub struct SightingInbox {
    path: String,
}

impl SightingInbox {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn claimed_path(&self) -> String {
        format!("{}.processing", self.path)
    }

    /// Queues a sighting for the next drain.
    pub fn push(&self, sighting: &Sighting) -> Result<()> {
        append_record(&self.path, sighting)
            .with_context(|| format!("failed to append to inbox '{}'", self.path))
    }

    /// Claims every pending row and removes it from the inbox.
    ///
    /// A claimed batch left behind by an interrupted drain is returned first.
    pub fn take(&self) -> Result<Vec<Sighting>> {
        let claimed = self.claimed_path();

        if !Path::new(&claimed).exists() {
            if !Path::new(&self.path).exists() {
                return Ok(Vec::new());
            }
            fs::rename(&self.path, &claimed)
                .with_context(|| format!("failed to claim inbox '{}'", self.path))?;
        } else {
            info!(path = %claimed, "Resuming interrupted inbox batch");
        }

        let rows = load_rows(&claimed)?;
        fs::remove_file(&claimed)
            .with_context(|| format!("failed to remove claimed inbox '{claimed}'"))?;
        debug!(path = %self.path, rows = rows.len(), "Inbox drained");
        Ok(rows)
    }
}
