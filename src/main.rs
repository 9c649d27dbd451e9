//! CLI entry point for the crowdsourced transit delay tracker.
//!
//! Provides subcommands for running the tracker service loop, one-off
//! lifecycle and aggregation passes, ingesting sightings, and reading the
//! delayed-route report and live trip views.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use gtfs_crowd_tracker::analyzers::analyzer::{HistoricalAggregator, default_target_date};
use gtfs_crowd_tracker::analyzers::patterns::PatternDetector;
use gtfs_crowd_tracker::config::{
    DEFAULT_CLEANUP_MINUTES, DEFAULT_LIFECYCLE_PERIOD_SECS, DEFAULT_LOOKAHEAD_MINUTES,
    DEFAULT_LOOKBACK_DAYS, TrackerConfig,
};
use gtfs_crowd_tracker::evidence::{EvidenceProcessor, ProcessOutcome};
use gtfs_crowd_tracker::lifecycle::TripLifecycleManager;
use gtfs_crowd_tracker::output::{print_json, print_pretty, write_json};
use gtfs_crowd_tracker::schedule::Schedule;
use gtfs_crowd_tracker::sighting::Sighting;
use gtfs_crowd_tracker::store::{CsvSightingLog, MemoryStore, SightingInbox, read_sightings_csv};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_crowd_tracker")]
#[command(about = "Crowdsourced real-time transit delay tracker", long_about = None)]
struct Cli {
    /// Schedule snapshot (JSON)
    #[arg(long, env = "TRACKER_SCHEDULE_PATH", default_value = "data/schedule.json", global = true)]
    schedule: String,

    /// Live state and daily summaries snapshot (JSON)
    #[arg(long, env = "TRACKER_STATE_PATH", default_value = "data/state.json", global = true)]
    state: String,

    /// Append-only sighting log (CSV)
    #[arg(long, env = "TRACKER_SIGHTINGS_PATH", default_value = "data/sightings.csv", global = true)]
    sightings: String,

    /// Drop file of new sightings drained by `run` on every pass (CSV)
    #[arg(long, env = "TRACKER_INBOX_PATH", default_value = "data/inbox.csv", global = true)]
    inbox: String,

    /// IANA timezone of the operator (defaults to the schedule's agency timezone)
    #[arg(long, env = "TRACKER_TIMEZONE", global = true)]
    timezone: Option<String>,

    /// Activate trips departing within this many minutes
    #[arg(long, env = "TRACKER_LOOKAHEAD_MINUTES", default_value_t = DEFAULT_LOOKAHEAD_MINUTES, global = true)]
    lookahead_minutes: i64,

    /// Retire trips this many minutes after their last scheduled arrival
    #[arg(long, env = "TRACKER_CLEANUP_MINUTES", default_value_t = DEFAULT_CLEANUP_MINUTES, global = true)]
    cleanup_minutes: i64,

    /// Trailing days of summaries used for patterns and predictions
    #[arg(long, env = "TRACKER_LOOKBACK_DAYS", default_value_t = DEFAULT_LOOKBACK_DAYS, global = true)]
    lookback_days: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lifecycle loop, drain the sighting inbox and aggregate daily until Ctrl+C
    Run {
        /// Seconds between lifecycle passes
        #[arg(short, long, default_value_t = DEFAULT_LIFECYCLE_PERIOD_SECS)]
        interval: u64,
    },
    /// Run one activation and retirement pass
    Lifecycle {
        /// Log what would change without writing
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Replay sightings from a CSV file at their own timestamps (offline only;
    /// while `run` is active, append to the inbox instead)
    Ingest {
        #[arg(value_name = "FILE")]
        input: String,
    },
    /// Summarize one service day of sightings into daily delay summaries
    Aggregate {
        /// Service date to aggregate (defaults to yesterday's service day)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,

        /// Compute and log the summaries without storing them
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Report routes delayed on most trip-days
    Patterns {
        /// Lookback in days (defaults to --lookback-days)
        #[arg(long)]
        days: Option<i64>,

        /// Write the report to this JSON file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show live trips with positions and predicted delays
    Live {
        /// Write the views to this JSON file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Everything a subcommand needs, loaded from disk once.
struct Tracker {
    schedule: Arc<Schedule>,
    state: Arc<MemoryStore>,
    state_path: String,
    sightings_path: String,
    inbox_path: String,
    config: TrackerConfig,
}

impl Tracker {
    fn load(cli: &Cli) -> Result<Self> {
        let schedule = Schedule::load(&cli.schedule)?;
        info!(
            path = %cli.schedule,
            trips = schedule.trip_count(),
            "Schedule loaded"
        );

        let state = MemoryStore::load(&cli.state)?;

        Ok(Self {
            schedule: Arc::new(schedule),
            state: Arc::new(state),
            state_path: cli.state.clone(),
            sightings_path: cli.sightings.clone(),
            inbox_path: cli.inbox.clone(),
            config: TrackerConfig {
                timezone: cli.timezone.clone(),
                lookahead_minutes: cli.lookahead_minutes,
                cleanup_minutes: cli.cleanup_minutes,
                lookback_days: cli.lookback_days,
            },
        })
    }

    fn lifecycle(&self) -> TripLifecycleManager<MemoryStore> {
        TripLifecycleManager::new(self.schedule.clone(), self.state.clone(), self.config.clone())
    }

    fn sighting_log(&self) -> Result<Arc<CsvSightingLog>> {
        Ok(Arc::new(CsvSightingLog::open(&self.sightings_path)?))
    }

    fn aggregator(&self, sightings: Arc<CsvSightingLog>) -> HistoricalAggregator<CsvSightingLog, MemoryStore> {
        HistoricalAggregator::new(
            self.schedule.clone(),
            sightings,
            self.state.clone(),
            self.config.clone(),
        )
    }

    fn processor(&self, sightings: Arc<CsvSightingLog>) -> Result<EvidenceProcessor<CsvSightingLog, MemoryStore>> {
        let tz = self.config.timezone(&self.schedule)?;
        Ok(EvidenceProcessor::new(self.schedule.clone(), sightings, self.state.clone(), tz))
    }

    fn patterns(&self) -> PatternDetector<MemoryStore> {
        PatternDetector::new(self.schedule.clone(), self.state.clone(), self.config.clone())
    }

    async fn save(&self) -> Result<()> {
        self.state.save(&self.state_path).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/gtfs_crowd_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_crowd_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let tracker = Tracker::load(&cli)?;

    match cli.command {
        Commands::Run { interval } => run(&tracker, interval).await?,
        Commands::Lifecycle { dry_run } => {
            if let Some(report) = tracker.lifecycle().run_once(Utc::now(), dry_run).await? {
                print_json(&report)?;
            }
            if !dry_run {
                tracker.save().await?;
            }
        }
        Commands::Ingest { input } => ingest(&tracker, &input).await?,
        Commands::Aggregate { date, dry_run } => {
            let cancel = Arc::new(AtomicBool::new(false));
            let watcher = cancel_on_ctrl_c(cancel.clone());

            let aggregator = tracker.aggregator(tracker.sighting_log()?);
            let date = match date {
                Some(date) => date,
                None => default_target_date(Utc::now(), tracker.config.timezone(&tracker.schedule)?)?,
            };
            let result = aggregator.run_for_date(date, dry_run, &cancel).await;
            watcher.abort();

            if let Some(report) = result? {
                print_json(&report)?;
            }
            if !dry_run {
                tracker.save().await?;
            }
        }
        Commands::Patterns { days, output } => {
            let days = days.unwrap_or(tracker.config.lookback_days);
            let report = tracker.patterns().report_over(Utc::now(), days).await?;
            match output {
                Some(path) => write_json(&path, &report)?,
                None => print_json(&report)?,
            }
        }
        Commands::Live { output } => {
            let views = tracker
                .patterns()
                .live_views(tracker.state.as_ref(), Utc::now())
                .await?;
            info!(live_trips = views.len(), "Live trips");
            match output {
                Some(path) => write_json(&path, &views)?,
                None => print_json(&views)?,
            }
        }
    }

    Ok(())
}

/// Sets `cancel` once Ctrl+C is received.
fn cancel_on_ctrl_c(cancel: Arc<AtomicBool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, cancelling");
            cancel.store(true, Ordering::Relaxed);
        }
    })
}

/// Runs the lifecycle manager every `interval` seconds and aggregates each
/// service day once the next one has begun. Sightings reach live state through
/// the inbox, drained at the start of every pass, so this process is the only
/// writer of the state file while it runs. State is saved after every pass
/// and on shutdown.
#[tracing::instrument(skip(tracker))]
async fn run(tracker: &Tracker, interval: u64) -> Result<()> {
    let tz = tracker.config.timezone(&tracker.schedule)?;
    let lifecycle = tracker.lifecycle();
    let log = tracker.sighting_log()?;
    let processor = tracker.processor(log.clone())?;
    let aggregator = Arc::new(tracker.aggregator(log));
    let inbox = SightingInbox::new(&tracker.inbox_path);
    let cancel = Arc::new(AtomicBool::new(false));

    let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval));
    let mut last_aggregated: Option<NaiveDate> = None;
    let mut aggregation: Option<JoinHandle<()>> = None;

    info!(interval, timezone = %tz, inbox = %inbox.path(), "Tracker running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }

        let now = Utc::now();
        match inbox.take() {
            Ok(rows) if !rows.is_empty() => {
                let counts = process_all(&processor, &rows, |_| now).await;
                info!(sightings = rows.len(), updated = counts.updated, skipped = counts.skipped, failed = counts.failed, unrecorded = counts.unrecorded.len(), "Inbox processed");
                for sighting in &counts.unrecorded {
                    if let Err(e) = inbox.push(sighting) {
                        error!(reporter = %sighting.reporter_id, error = %e, "Dropping sighting that could not be requeued");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Failed to drain sighting inbox"),
        }

        match lifecycle.run_once(now, false).await {
            Ok(Some(report)) => print_pretty(&report),
            Ok(None) => {}
            Err(e) => error!(error = %e, "Lifecycle run failed"),
        }

        // Aggregate the previous service day once per day
        let target = default_target_date(now, tz)?;
        if last_aggregated.is_none_or(|done| done < target) {
            let aggregator = aggregator.clone();
            let cancel = cancel.clone();
            aggregation = Some(tokio::spawn(async move {
                info!(date = %target, "Aggregating previous service day");
                match aggregator.run_for_date(target, false, &cancel).await {
                    Ok(Some(report)) => {
                        info!(date = %target, created = report.created, updated = report.updated, "Previous service day aggregated");
                    }
                    Ok(None) => {}
                    Err(e) => error!(date = %target, error = %e, "Failed to aggregate previous service day"),
                }
            }));
            last_aggregated = Some(target);
        }

        if let Err(e) = tracker.save().await {
            error!(error = %e, "Failed to save state");
        }
    }

    cancel.store(true, Ordering::Relaxed);
    if let Some(handle) = aggregation
        && let Err(e) = handle.await
    {
        error!(error = %e, "Aggregation task failed");
    }
    tracker.save().await?;
    info!(path = %tracker.state_path, "State saved");
    Ok(())
}

#[derive(Debug, Default)]
struct IngestCounts {
    updated: usize,
    skipped: usize,
    failed: usize,
    /// Sightings that could not be written to the log.
    unrecorded: Vec<Sighting>,
}

/// Records and applies each sighting in order, at the processing time
/// `now_for` picks for it. A sighting the log rejects is logged and handed
/// back in [`IngestCounts::unrecorded`].
async fn process_all(
    processor: &EvidenceProcessor<CsvSightingLog, MemoryStore>,
    rows: &[Sighting],
    now_for: impl Fn(&Sighting) -> chrono::DateTime<Utc>,
) -> IngestCounts {
    let mut counts = IngestCounts::default();
    for sighting in rows {
        match processor.record_and_process(sighting, now_for(sighting)).await {
            Ok(outcome) => {
                debug!(reporter = %sighting.reporter_id, ?outcome, "Sighting ingested");
                match outcome {
                    ProcessOutcome::Updated { .. } => counts.updated += 1,
                    ProcessOutcome::Failed { .. } => counts.failed += 1,
                    ProcessOutcome::NoTrip | ProcessOutcome::UnknownTrip | ProcessOutcome::Retired => {
                        counts.skipped += 1
                    }
                }
            }
            Err(e) => {
                error!(reporter = %sighting.reporter_id, error = %e, "Failed to ingest sighting");
                counts.unrecorded.push(sighting.clone());
            }
        }
    }
    counts
}

/// Records every sighting in `input` and applies it to live state, using the
/// sighting's own timestamp as the processing time.
///
/// Loads and saves the state file itself, so it must not run alongside `run`.
#[tracing::instrument(skip(tracker))]
async fn ingest(tracker: &Tracker, input: &str) -> Result<()> {
    let rows = read_sightings_csv(input)?;
    if rows.is_empty() && !Path::new(input).exists() {
        anyhow::bail!("sighting file '{input}' does not exist");
    }

    let log = tracker.sighting_log()?;
    let processor = tracker.processor(log.clone())?;
    let counts = process_all(&processor, &rows, |s| s.timestamp).await;

    tracker.save().await.context("failed to save state after ingest")?;
    if !counts.unrecorded.is_empty() {
        anyhow::bail!("{} sightings could not be written to the log", counts.unrecorded.len());
    }
    info!(
        input,
        sightings = rows.len(),
        updated = counts.updated,
        skipped = counts.skipped,
        failed = counts.failed,
        log_rows = log.len().await,
        "Ingest complete"
    );
    Ok(())
}
