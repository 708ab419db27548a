// src/lib.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
//
// Crate root: module declarations and public re-exports.

// ===== Replay engine =====
pub mod buffer;
pub mod clock;
pub mod event;
pub mod gate;
pub mod scheduler;
pub mod stats;

// ===== Configuration =====
pub mod config;
pub mod constants;

// ===== Collaborators: where events come from and where they go =====
pub mod sink;
pub mod source;

// ===== Storage backends =====
pub mod file_store;
pub mod object_store;

pub use buffer::{BufferState, Interrupted, ReplayBuffer};
pub use clock::ReplayClock;
pub use config::{Backpressure, ConfigError, ReplayConfig, SourceFormat};
pub use event::Event;
pub use gate::{BackpressureGate, GatePermit};
pub use scheduler::{DryRunTracer, ReplayOutcome, ReplayScheduler, ReplaySummary};
pub use sink::{CompletionHandle, JsonLinesSink, PendingSend, Sink, SinkError, pending_send};
pub use source::{
    EventSource, FieldMapping, MemoryRecords, ObjectRecordReader, ReaderOptions, Record,
    RecordStream, SourceError, TimedSource,
};
pub use stats::{ThroughputReport, ThroughputStats};
