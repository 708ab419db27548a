// src/clock.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Mapping from domain time to replay wall-clock time.
//!
//! Uses an absolute reference point rather than per-event deltas so that
//! rounding never accumulates into drift over a long replay.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Upper bound on any scheduled delay.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct ReplayClock {
    speedup: f64,
    reference_domain: Option<DateTime<Utc>>,
    reference_wall: Option<Instant>,
}

impl ReplayClock {
    /// `speedup` should be positive and finite; see [`ReplayConfig::validate`](crate::ReplayConfig::validate).
    /// Anything else pushes every later record out to a far-future instant.
    pub fn new(speedup: f64) -> Self {
        Self {
            speedup,
            reference_domain: None,
            reference_wall: None,
        }
    }

    pub fn speedup(&self) -> f64 {
        self.speedup
    }

    pub fn set_speedup(&mut self, speedup: f64) {
        self.speedup = speedup;
    }

    /// Scheduled emission instant for a record with domain time `ts`.
    ///
    /// The first call anchors the clock: `ts` (or the seek target, if one was
    /// set) maps to the current instant.
    pub fn schedule(&mut self, ts: DateTime<Utc>) -> Instant {
        let reference_domain = *self.reference_domain.get_or_insert(ts);
        let reference_wall = *self.reference_wall.get_or_insert_with(Instant::now);

        // Records older than the reference are due immediately.
        let offset = (ts - reference_domain).to_std().unwrap_or(Duration::ZERO);
        if offset.is_zero() {
            return reference_wall;
        }

        // Saturates instead of panicking on delays no Duration or Instant can hold.
        let delay = Duration::try_from_secs_f64(offset.as_secs_f64() / self.speedup)
            .map_or(FAR_FUTURE, |delay| delay.min(FAR_FUTURE));
        reference_wall.checked_add(delay).unwrap_or(reference_wall)
    }

    /// Re-anchor so that `target` maps to the instant of the next `schedule` call.
    pub fn rebase(&mut self, target: DateTime<Utc>) {
        debug!("rebasing replay clock to {}", target);
        self.reference_domain = Some(target);
        self.reference_wall = None;
    }

    pub fn reference_domain(&self) -> Option<DateTime<Utc>> {
        self.reference_domain
    }
}
