pub mod analyzers;
pub mod config;
pub mod error;
pub mod evidence;
pub mod lifecycle;
pub mod live;
pub mod output;
pub mod schedule;
pub mod service_time;
pub mod sighting;
pub mod store;

#[cfg(test)]
mod test_support;
