//! Historical delay analysis.
//!
//! This module folds a service day's sightings into per-trip daily delay
//! summaries, stores them, and reads them back to flag chronically delayed
//! routes and to predict the delay of live trips.

pub mod aggregate;
pub mod analyzer;
pub mod patterns;
pub mod types;
pub mod utility;
