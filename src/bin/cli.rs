// src/bin/cli.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
//
//! Replay a historical dataset as a paced stream of JSON lines.
//!
//! Examples:
//! ```bash
//! # NYC taxi trips at one hour per second, to stdout
//! streamreplay --source file:///data/trips/ -v
//!
//! # Real time, starting mid-dataset, into 4 partition files
//! streamreplay --source file:///data/trips/ --speedup 1 \
//!     --seek 2018-01-01T06:00:00Z --output ./out/ --partitions 4
//!
//! # Check pacing without writing anything
//! streamreplay --source file:///data/trips/ --dry-run -v
//! ```

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use streamreplay::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_MAX_OUTSTANDING_RECORDS, DEFAULT_SOURCE_URI, DEFAULT_SPEEDUP,
    DEFAULT_TIMESTAMP_ATTRIBUTE,
};
use streamreplay::source::reader::parse_timestamp;
use streamreplay::{
    Backpressure, FieldMapping, JsonLinesSink, ObjectRecordReader, ReaderOptions, ReplayConfig,
    ReplayOutcome, ReplayScheduler, Sink, SourceFormat, TimedSource,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    /// Prefix URI of the objects to replay
    #[arg(long, value_name = "URI", default_value = DEFAULT_SOURCE_URI)]
    source: String,

    /// Only replay objects whose URI matches this regex
    #[arg(long, value_name = "REGEX")]
    pattern: Option<String>,

    /// Record layout of the source objects
    #[arg(long, value_enum, default_value_t = SourceFormat::Auto)]
    format: SourceFormat,

    /// Field holding the event time
    #[arg(long, default_value = DEFAULT_TIMESTAMP_ATTRIBUTE)]
    timestamp_attribute: String,

    /// Keep field names and values as they are (no taxi renames or coercion)
    #[arg(long)]
    raw_fields: bool,

    /// Stop at the first malformed record instead of skipping it
    #[arg(long)]
    strict: bool,

    /// Output file, or directory when --partitions > 1; `-` for stdout
    #[arg(long, value_name = "URI|-", default_value = "-")]
    output: String,

    /// Number of output partitions
    #[arg(long, default_value_t = 1)]
    partitions: usize,

    /// Factor by which original gaps between events are compressed
    #[arg(long, default_value_t = DEFAULT_SPEEDUP)]
    speedup: f64,

    /// Wall-clock interval between throughput reports (e.g. 20s, 1m)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration, default_value = "20s")]
    statistics_frequency: Duration,

    /// Skip every event before this time (RFC 3339 or `YYYY-MM-DD HH:MM:SS`)
    #[arg(long, value_name = "TIME", value_parser = parse_seek)]
    seek: Option<DateTime<Utc>>,

    /// Number of events prefetched ahead of the replay
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Maximum number of sends awaiting completion
    #[arg(long, default_value_t = DEFAULT_MAX_OUTSTANDING_RECORDS)]
    max_outstanding_records: usize,

    /// Do not limit in-flight sends
    #[arg(long)]
    no_backpressure: bool,

    /// Log a sample of events instead of sending them
    #[arg(long)]
    dry_run: bool,
}

fn parse_seek(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_timestamp(&serde_json::Value::String(s.to_string()))
        .ok_or_else(|| format!("invalid time `{}`", s))
}

impl Cli {
    fn replay_config(&self) -> ReplayConfig {
        let backpressure = if self.no_backpressure {
            Backpressure::Disabled
        } else {
            Backpressure::Bounded(self.max_outstanding_records)
        };

        let mut config = ReplayConfig::default()
            .with_buffer_size(self.buffer_size)
            .with_backpressure(backpressure)
            .with_speedup(self.speedup)
            .with_statistics_interval(self.statistics_frequency)
            .dry_run(self.dry_run);
        if let Some(target) = self.seek {
            config = config.seek_to(target);
        }
        config
    }

    fn reader_options(&self) -> Result<ReaderOptions> {
        let mapping = if self.raw_fields {
            FieldMapping::identity()
        } else {
            FieldMapping::nyc_taxi()
        };

        let mut options = ReaderOptions::default()
            .with_timestamp_attribute(self.timestamp_attribute.clone())
            .with_format(self.format)
            .with_mapping(mapping)
            .skip_malformed(!self.strict);
        if let Some(pattern) = &self.pattern {
            let pattern = Regex::new(pattern).with_context(|| format!("invalid --pattern `{}`", pattern))?;
            options = options.with_pattern(pattern);
        }
        Ok(options)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",        // no -v: WARN level
        1 => "info",        // -v: INFO level
        _ => "debug",       // -vv or more: DEBUG level
    };

    // Logs go to stderr so they never mix with records written to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.replay_config();
    config.validate()?;

    let reader = ObjectRecordReader::open(&cli.source, cli.reader_options()?)
        .await
        .with_context(|| format!("failed to open source {}", cli.source))?;
    if reader.remaining_objects() == 0 {
        warn!("no objects found under {}", cli.source);
    }
    let source = TimedSource::new(reader);

    let sink = JsonLinesSink::create(&cli.output, cli.partitions)
        .await
        .with_context(|| format!("failed to open output {}", cli.output))?;

    let sink = Arc::new(sink);
    let scheduler = ReplayScheduler::new(config, Box::new(source), sink.clone())?;

    let token = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            token.cancel();
        }
    });

    let summary = scheduler.run().await;
    if summary.outcome == ReplayOutcome::NoEvents {
        // The scheduler leaves an unused sink open.
        sink.close().await?;
    }
    info!(
        "{} events replayed, {} failed sends, last event time {}",
        summary.events_emitted,
        summary.failed_sends,
        summary
            .last_domain_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "n/a".to_string())
    );

    if summary.outcome == ReplayOutcome::SourceFailed {
        bail!(
            "replay stopped early: {}",
            summary.source_error.unwrap_or_else(|| "source failed".to_string())
        );
    }
    Ok(())
}
