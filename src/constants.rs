// src/constants.rs
//
// Centralized constants for streamreplay to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Default capacity of the replay buffer (events held ahead of the scheduler)
pub const DEFAULT_BUFFER_SIZE: usize = 100_000;

/// Default maximum number of unresolved sends when backpressure is enabled
pub const DEFAULT_MAX_OUTSTANDING_RECORDS: usize = 10_000;

/// Default speedup factor: one hour of source data per wall-clock second
pub const DEFAULT_SPEEDUP: f64 = 3600.0;

/// Default interval between throughput reports (20 seconds)
pub const DEFAULT_STATISTICS_INTERVAL: Duration = Duration::from_secs(20);

/// Default record attribute carrying the domain timestamp
pub const DEFAULT_TIMESTAMP_ATTRIBUTE: &str = "dropoff_datetime";

/// Dry-run mode logs at most one event per this much scheduled time
pub const DEFAULT_DRY_RUN_TRACE_WINDOW: Duration = Duration::from_secs(1);

/// Date-time layout used by the NYC taxi trip data (interpreted as UTC)
pub const RECORD_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Conversion factor applied to `trip_distance` (miles to metres)
pub const METRES_PER_MILE: f64 = 1609.34;

/// Maximum number of submissions the file sink writes per batch
pub const DEFAULT_SINK_BATCH_SIZE: usize = 512;

/// Default source prefix used by the CLI
pub const DEFAULT_SOURCE_URI: &str = "file://./data/";
