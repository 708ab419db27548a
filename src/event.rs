// src/event.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! A single replayable record: payload, original domain time, and the
//! wall-clock instant at which the scheduler must emit it.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use tokio::time::Instant;

/// Immutable replay event.
///
/// Created by an [`EventSource`](crate::source::EventSource) at read time and
/// dropped once the sink has accepted it (or on shutdown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    payload: Bytes,
    domain_timestamp: DateTime<Utc>,
    scheduled_time: Instant,
}

impl Event {
    pub fn new(payload: Bytes, domain_timestamp: DateTime<Utc>, scheduled_time: Instant) -> Self {
        Self {
            payload,
            domain_timestamp,
            scheduled_time,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Original event time carried by the record.
    pub fn domain_timestamp(&self) -> DateTime<Utc> {
        self.domain_timestamp
    }

    /// Instant at which this event is due during replay.
    pub fn scheduled_time(&self) -> Instant {
        self.scheduled_time
    }

    /// Sink partition key.
    ///
    /// Derived from payload and domain time only, so replaying the same
    /// dataset twice routes every record to the same partition.
    pub fn partition_key(&self) -> String {
        let mut hasher = Hasher::new();
        hasher.update(&self.payload);
        hasher.update(&self.domain_timestamp.timestamp_micros().to_le_bytes());
        format!("{:08x}", hasher.finalize())
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
