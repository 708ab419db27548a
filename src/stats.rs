// src/stats.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Rolling throughput counters for the replay loop.
//!
//! Wall-clock time since the loop started is divided into fixed-width slots
//! of one statistics interval; a report is produced on the first event that
//! lands in a new slot.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    /// Events counted since the previous report.
    pub events: u64,
    /// `events` spread over one interval, rounded.
    pub events_per_second: f64,
    /// Every event emitted since the loop started.
    pub total_events: u64,
}

#[derive(Debug, Clone)]
pub struct ThroughputStats {
    interval: Duration,
    started: Instant,
    last_slot: u64,
    events_in_slot: u64,
    total_events: u64,
}

impl ThroughputStats {
    pub fn new(interval: Duration, started: Instant) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            started,
            last_slot: 0,
            events_in_slot: 0,
            total_events: 0,
        }
    }

    /// Count one emitted event observed at `now`.
    pub fn record(&mut self, now: Instant) -> Option<ThroughputReport> {
        self.events_in_slot += 1;
        self.total_events += 1;

        let slot = self.slot_of(now);
        if slot == self.last_slot {
            return None;
        }

        let report = ThroughputReport {
            events: self.events_in_slot,
            events_per_second: (self.events_in_slot as f64 / self.interval.as_secs_f64()).round(),
            total_events: self.total_events,
        };
        self.events_in_slot = 0;
        self.last_slot = slot;
        Some(report)
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    fn slot_of(&self, now: Instant) -> u64 {
        (self.elapsed(now).as_nanos() / self.interval.as_nanos()) as u64
    }
}
