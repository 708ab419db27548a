// tests/common/mod.rs
//
// Shared fixtures for the replay integration tests: record builders,
// scripted sources and a sink that records what it was given.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use streamreplay::sink::{CompletionHandle, PendingSend, Sink, SinkError, pending_send};
use streamreplay::source::{EventSource, MemoryRecords, Record, RecordStream, SourceError, TimedSource};
use streamreplay::Event;

/// 2018-01-01T00:00:00Z plus `secs`.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_514_764_800 + secs, 0).unwrap()
}

pub fn ts_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_514_764_800_000 + ms).unwrap()
}

/// One record per entry, payload `{"t":<secs>}`.
pub fn records(secs: &[i64]) -> MemoryRecords {
    MemoryRecords::new(
        secs.iter()
            .map(|s| Record::new(ts(*s), format!("{{\"t\":{}}}", s))),
    )
}

pub fn timed(secs: &[i64]) -> Box<dyn EventSource> {
    Box::new(TimedSource::new(records(secs)))
}

/// Yields its records, then never resolves again.
pub struct StallingRecords(pub MemoryRecords);

#[async_trait]
impl RecordStream for StallingRecords {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        match self.0.next_record().await? {
            Some(record) => Ok(Some(record)),
            None => std::future::pending().await,
        }
    }
}

/// Yields its records, then fails.
pub struct FailingRecords(pub MemoryRecords);

#[async_trait]
impl RecordStream for FailingRecords {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        match self.0.next_record().await? {
            Some(record) => Ok(Some(record)),
            None => Err(SourceError::Malformed {
                location: "fixture:1".to_string(),
                reason: "unparsable timestamp".to_string(),
            }),
        }
    }
}

/// Counts how many records have been pulled.
pub struct CountingRecords {
    pub inner: MemoryRecords,
    pub reads: Arc<AtomicUsize>,
}

#[async_trait]
impl RecordStream for CountingRecords {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        let next = self.inner.next_record().await?;
        if next.is_some() {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        Ok(next)
    }
}

/// Event source with pre-computed scheduled times.
pub struct ScriptedSource(pub VecDeque<Event>);

impl ScriptedSource {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        Self(events.into_iter().collect())
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.0.pop_front())
    }

    async fn seek(&mut self, target: DateTime<Utc>) -> Result<(), SourceError> {
        self.0.retain(|e| e.domain_timestamp() >= target);
        Ok(())
    }

    fn set_speedup(&mut self, _speedup: f64) {}
}

/// Yields `events` scheduled events, then panics on the next read.
pub struct PanickingSource {
    pub inner: TimedSource<MemoryRecords>,
    pub events: usize,
}

impl PanickingSource {
    pub fn after(secs: &[i64]) -> Self {
        Self {
            inner: TimedSource::new(records(secs)),
            events: secs.len(),
        }
    }
}

#[async_trait]
impl EventSource for PanickingSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        if self.events == 0 {
            panic!("source blew up mid-read");
        }
        self.events -= 1;
        self.inner.next_event().await
    }

    async fn seek(&mut self, target: DateTime<Utc>) -> Result<(), SourceError> {
        self.inner.seek(target).await
    }

    fn set_speedup(&mut self, speedup: f64) {
        self.inner.set_speedup(speedup);
    }
}

pub fn scripted_event(secs: i64, scheduled: Instant) -> Event {
    Event::new(Bytes::from(format!("{{\"t\":{}}}", secs)), ts(secs), scheduled)
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub key: String,
    pub payload: Bytes,
    pub at: Instant,
}

#[derive(Default)]
struct SinkState {
    submissions: Vec<Submission>,
    held: VecDeque<CompletionHandle>,
    max_held: usize,
    flushes: usize,
    closes: usize,
}

/// Sink that records submissions.
///
/// In manual mode every send stays unresolved until the test completes it
/// (or the sink is flushed); otherwise sends resolve immediately.
pub struct RecordingSink {
    manual: bool,
    state: Mutex<SinkState>,
}

impl RecordingSink {
    pub fn auto() -> Arc<Self> {
        Arc::new(Self {
            manual: false,
            state: Mutex::default(),
        })
    }

    pub fn manual() -> Arc<Self> {
        Arc::new(Self {
            manual: true,
            state: Mutex::default(),
        })
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submitted(&self) -> usize {
        self.state.lock().unwrap().submissions.len()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.submissions()
            .iter()
            .map(|s| String::from_utf8(s.payload.to_vec()).unwrap())
            .collect()
    }

    pub fn submit_times(&self) -> Vec<Instant> {
        self.submissions().iter().map(|s| s.at).collect()
    }

    /// Resolve the oldest unresolved send.
    pub fn complete_next(&self, result: Result<(), SinkError>) -> bool {
        let handle = self.state.lock().unwrap().held.pop_front();
        match handle {
            Some(handle) => {
                handle.complete(result);
                true
            }
            None => false,
        }
    }

    pub fn unresolved(&self) -> usize {
        self.state.lock().unwrap().held.len()
    }

    pub fn max_unresolved(&self) -> usize {
        self.state.lock().unwrap().max_held
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().unwrap().flushes
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn submit(&self, key: &str, payload: Bytes) -> PendingSend {
        let mut state = self.state.lock().unwrap();
        state.submissions.push(Submission {
            key: key.to_string(),
            payload,
            at: Instant::now(),
        });

        if !self.manual {
            return PendingSend::ready(Ok(()));
        }
        let (handle, pending) = pending_send();
        state.held.push_back(handle);
        state.max_held = state.max_held.max(state.held.len());
        pending
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let held: Vec<_> = {
            let mut state = self.state.lock().unwrap();
            state.flushes += 1;
            state.held.drain(..).collect()
        };
        for handle in held {
            handle.complete(Ok(()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Let spawned tasks run without advancing a paused clock past any timer
/// that matters to the test.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
