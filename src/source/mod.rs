// src/source/mod.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Source side of a replay.
//!
//! Two layers:
//!
//! * [`RecordStream`] – yields parsed records (`timestamp` + `payload`) in
//!   non-decreasing timestamp order. Object readers and in-memory fixtures
//!   live here.
//! * [`EventSource`] – what the replay buffer consumes: records already
//!   stamped with their scheduled emission instant. [`TimedSource`] turns any
//!   `RecordStream` into an `EventSource` using a [`ReplayClock`].

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::ReplayClock;
use crate::event::Event;

pub mod normalize;
pub mod reader;

pub use normalize::FieldMapping;
pub use reader::{ObjectRecordReader, ReaderOptions};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("malformed record in {location}: {reason}")]
    Malformed { location: String, reason: String },

    #[error("failed to decode {uri}: {reason}")]
    Decode { uri: String, reason: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A parsed record that has not been scheduled yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub payload: Bytes,
}

impl Record {
    pub fn new(timestamp: DateTime<Utc>, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }
}

/// Lazy, finite, non-restartable sequence of parsed records.
#[async_trait]
pub trait RecordStream: Send {
    /// Next record, or `None` once the stream is exhausted.
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError>;
}

/// Ordered stream of scheduled events consumed by the replay buffer.
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the source is drained.
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;

    /// Skip every record before `target` and schedule the rest relative to it.
    async fn seek(&mut self, target: DateTime<Utc>) -> Result<(), SourceError>;

    /// Ratio applied to domain-time gaps when scheduling events.
    ///
    /// The scheduler sets this from its configuration before reading the
    /// first event. Sources that carry precomputed schedules may ignore it.
    fn set_speedup(&mut self, speedup: f64);
}

/// Stamps records from a [`RecordStream`] with their scheduled emission time.
///
/// Schedules at real-time pace until [`EventSource::set_speedup`] says otherwise.
pub struct TimedSource<R> {
    records: R,
    clock: ReplayClock,
    pending: Option<Record>,
}

impl<R: RecordStream> TimedSource<R> {
    pub fn new(records: R) -> Self {
        Self {
            records,
            clock: ReplayClock::new(1.0),
            pending: None,
        }
    }

    pub fn clock(&self) -> &ReplayClock {
        &self.clock
    }
}

#[async_trait]
impl<R: RecordStream> EventSource for TimedSource<R> {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        let record = match self.pending.take() {
            Some(record) => record,
            None => match self.records.next_record().await? {
                Some(record) => record,
                None => return Ok(None),
            },
        };

        let scheduled = self.clock.schedule(record.timestamp);
        Ok(Some(Event::new(record.payload, record.timestamp, scheduled)))
    }

    async fn seek(&mut self, target: DateTime<Utc>) -> Result<(), SourceError> {
        let mut skipped = 0u64;

        if let Some(record) = self.pending.take() {
            if record.timestamp >= target {
                self.pending = Some(record);
            } else {
                skipped += 1;
            }
        }

        while self.pending.is_none() {
            match self.records.next_record().await? {
                Some(record) if record.timestamp < target => skipped += 1,
                Some(record) => self.pending = Some(record),
                None => break,
            }
        }

        info!("seek to {} skipped {} records", target, skipped);
        if self.pending.is_none() {
            debug!("source exhausted while seeking");
        }

        self.clock.rebase(target);
        Ok(())
    }

    fn set_speedup(&mut self, speedup: f64) {
        self.clock.set_speedup(speedup);
    }
}

/// In-memory record stream.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecords {
    records: VecDeque<Record>,
}

impl MemoryRecords {
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: records.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RecordStream for MemoryRecords {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        Ok(self.records.pop_front())
    }
}
