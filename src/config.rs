// src/config.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Runtime parameters for a replay run.
//!
//! Builder helpers are provided so callers can write a fluent style:
//!
//! let config = ReplayConfig::default()
//!     .with_buffer_size(10_000)
//!     .with_backpressure(Backpressure::Bounded(1_000))
//!     .with_speedup(60.0)
//!     .with_statistics_interval(Duration::from_secs(5))
//!     .dry_run(true);

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use std::time::Duration;
use thiserror::Error;

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_DRY_RUN_TRACE_WINDOW, DEFAULT_MAX_OUTSTANDING_RECORDS,
    DEFAULT_SPEEDUP, DEFAULT_STATISTICS_INTERVAL,
};

/// Record layout of the source objects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum SourceFormat {
    /// Decide per object from its extension (`.csv[.zst]` is CSV, anything else JSON lines)
    #[default]
    Auto,
    Json,
    Csv,
}

/// How many submitted-but-unresolved sends the scheduler tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backpressure {
    /// Block before submitting once this many sends are unresolved.
    Bounded(usize),
    /// Fire-and-forget: no limit and no synchronisation.
    Disabled,
}

impl Default for Backpressure {
    fn default() -> Self {
        Backpressure::Bounded(DEFAULT_MAX_OUTSTANDING_RECORDS)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("buffer size must be at least 1")]
    ZeroBufferSize,

    #[error("max outstanding records must be at least 1 when backpressure is enabled")]
    ZeroOutstanding,

    #[error("speedup factor must be a positive finite number, got {0}")]
    InvalidSpeedup(f64),

    #[error("statistics interval must be greater than zero")]
    ZeroStatisticsInterval,
}

#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Capacity of the replay buffer.
    pub buffer_size: usize,
    /// Limit on in-flight sink operations.
    pub backpressure: Backpressure,
    /// Ratio by which original inter-event gaps are compressed (>1) or expanded (<1).
    pub speedup: f64,
    /// Wall-clock width of one statistics slot.
    pub statistics_interval: Duration,
    /// Skip every record before this domain time and schedule relative to it.
    pub seek_to: Option<DateTime<Utc>>,
    /// Log events instead of sending them.
    pub dry_run: bool,
    /// Dry-run logs at most one event per window of scheduled time.
    pub dry_run_trace_window: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            backpressure: Backpressure::default(),
            speedup: DEFAULT_SPEEDUP,
            statistics_interval: DEFAULT_STATISTICS_INTERVAL,
            seek_to: None,
            dry_run: false,
            dry_run_trace_window: DEFAULT_DRY_RUN_TRACE_WINDOW,
        }
    }
}

impl ReplayConfig {
    pub fn with_buffer_size(mut self, n: usize) -> Self {
        self.buffer_size = n;
        self
    }

    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Convenience for `with_backpressure(Backpressure::Disabled)`.
    pub fn without_backpressure(self) -> Self {
        self.with_backpressure(Backpressure::Disabled)
    }

    pub fn with_speedup(mut self, speedup: f64) -> Self {
        self.speedup = speedup;
        self
    }

    pub fn with_statistics_interval(mut self, interval: Duration) -> Self {
        self.statistics_interval = interval;
        self
    }

    pub fn seek_to(mut self, target: DateTime<Utc>) -> Self {
        self.seek_to = Some(target);
        self
    }

    pub fn dry_run(mut self, yes: bool) -> Self {
        self.dry_run = yes;
        self
    }

    pub fn with_dry_run_trace_window(mut self, window: Duration) -> Self {
        self.dry_run_trace_window = window;
        self
    }

    /// Reject parameter combinations the replay engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.backpressure == Backpressure::Bounded(0) {
            return Err(ConfigError::ZeroOutstanding);
        }
        if !self.speedup.is_finite() || self.speedup <= 0.0 {
            return Err(ConfigError::InvalidSpeedup(self.speedup));
        }
        if self.statistics_interval.is_zero() {
            return Err(ConfigError::ZeroStatisticsInterval);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ReplayConfig::default();
        assert_eq!(config.buffer_size, 100_000);
        assert_eq!(config.backpressure, Backpressure::Bounded(10_000));
        assert_eq!(config.speedup, 3600.0);
        assert_eq!(config.statistics_interval, Duration::from_secs(20));
        assert!(config.seek_to.is_none());
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = ReplayConfig::default();

        assert_eq!(
            base.clone().with_buffer_size(0).validate(),
            Err(ConfigError::ZeroBufferSize)
        );
        assert_eq!(
            base.clone().with_backpressure(Backpressure::Bounded(0)).validate(),
            Err(ConfigError::ZeroOutstanding)
        );
        assert!(matches!(
            base.clone().with_speedup(0.0).validate(),
            Err(ConfigError::InvalidSpeedup(_))
        ));
        assert!(matches!(
            base.clone().with_speedup(f64::NAN).validate(),
            Err(ConfigError::InvalidSpeedup(_))
        ));
        assert_eq!(
            base.with_statistics_interval(Duration::ZERO).validate(),
            Err(ConfigError::ZeroStatisticsInterval)
        );
    }

    #[test]
    fn disabled_backpressure_ignores_capacity_rules() {
        let config = ReplayConfig::default().without_backpressure();
        assert_eq!(config.backpressure, Backpressure::Disabled);
        assert!(config.validate().is_ok());
    }
}
