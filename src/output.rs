//! Output formatting for reports and live views.
//!
//! Supports pretty-printing, JSON to stdout, and JSON files.

use std::fmt::Debug;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty(value: &impl Debug) {
    debug!("{:#?}", value);
}

/// Writes a value to stdout as pretty-printed JSON.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes a value as pretty-printed JSON to `path`, creating parent
/// directories and replacing any existing file.
pub fn write_json(path: &str, value: &impl Serialize) -> Result<()> {
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(path, body).with_context(|| format!("failed to write {path}"))?;
    info!(path, "JSON written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::types::DelayPrediction;
    use std::env;

    fn temp_path(name: &str) -> String {
        format!("{}/{}", env::temp_dir().display(), name)
    }

    fn prediction() -> DelayPrediction {
        DelayPrediction {
            predicted_delay_seconds: Some(120),
            confidence: 3,
        }
    }

    #[test]
    fn test_print_pretty_does_not_panic() {
        print_pretty(&prediction());
    }

    #[test]
    fn test_print_json_does_not_panic() {
        print_json(&prediction()).unwrap();
    }

    #[test]
    fn test_write_json_creates_dirs_and_overwrites() {
        let dir = temp_path("gtfs_crowd_tracker_test_output");
        let _ = fs::remove_dir_all(&dir);
        let path = format!("{dir}/nested/report.json");

        write_json(&path, &prediction()).unwrap();
        write_json(&path, &prediction()).unwrap();

        let content: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(content["predicted_delay_seconds"], 120);
        assert_eq!(content["confidence"], 3);

        fs::remove_dir_all(&dir).unwrap();
    }
}
