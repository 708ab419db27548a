// src/scheduler.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! The replay control loop.
//!
//! Lifecycle: priming (optional seek, then prefill of the buffer), running
//! (take, wait for the scheduled instant, submit through the gate, report),
//! and shutdown. Shutdown interrupts the buffer, then flushes and closes the
//! sink, and runs exactly once whichever way the loop ended. A replay that
//! found nothing to send leaves the sink untouched.
//!
//! Events that are already late are emitted back to back with no delay; the
//! loop never drops an event to get back on schedule.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::{Interrupted, ReplayBuffer};
use crate::config::{ConfigError, ReplayConfig};
use crate::event::Event;
use crate::gate::BackpressureGate;
use crate::sink::Sink;
use crate::source::EventSource;
use crate::stats::ThroughputStats;

/// Why a replay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Every event was submitted.
    Completed,
    /// The cancellation token fired.
    Cancelled,
    /// Priming found nothing to replay; the sink was never touched.
    NoEvents,
    /// Reading or seeking the source failed; events read before the failure were submitted.
    SourceFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub outcome: ReplayOutcome,
    /// Events submitted to the sink (or traced, in dry-run mode).
    pub events_emitted: u64,
    /// Submitted sends observed to fail by the time the sink was closed.
    pub failed_sends: u64,
    /// Domain time of the last emitted event.
    pub last_domain_time: Option<DateTime<Utc>>,
    pub elapsed: Duration,
    pub source_error: Option<String>,
}

#[derive(Debug, Default)]
struct Progress {
    emitted: u64,
    last_domain_time: Option<DateTime<Utc>>,
    source_error: Option<String>,
}

pub struct ReplayScheduler {
    config: ReplayConfig,
    source: Box<dyn EventSource>,
    sink: Arc<dyn Sink>,
    gate: BackpressureGate,
    cancel: CancellationToken,
}

impl ReplayScheduler {
    pub fn new(
        config: ReplayConfig,
        source: Box<dyn EventSource>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let gate = BackpressureGate::new(config.backpressure);
        Ok(Self {
            config,
            source,
            sink,
            gate,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop the replay when `token` is cancelled.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this replay.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn gate(&self) -> &BackpressureGate {
        &self.gate
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Replay every event, returning once the source is drained or the
    /// replay is cancelled. Never fails; the summary says how it ended.
    ///
    /// Dropping the returned future stops the buffer filler and hands the
    /// sink flush and close to a background task.
    pub async fn run(self) -> ReplaySummary {
        let ReplayScheduler {
            config,
            source,
            sink,
            gate,
            cancel,
        } = self;

        let started = Instant::now();
        let replay = Replay {
            config,
            sink,
            gate,
            cancel: cancel.child_token(),
        };
        let _stop_on_drop = replay.cancel.clone().drop_guard();
        let mut cleanup = CleanupOnDrop(Some(Arc::clone(&replay.sink)));

        let mut progress = Progress::default();
        let mut buffer = None;
        let outcome = replay.replay(source, &mut buffer, &mut progress).await;

        // From here on the spawned shutdown owns cleanup, even if this future is dropped.
        cleanup.0 = None;
        let sink = (outcome != ReplayOutcome::NoEvents).then(|| Arc::clone(&replay.sink));
        if let Err(e) = tokio::spawn(shutdown(buffer, sink)).await {
            error!("replay shutdown ended abnormally: {}", e);
        }

        let summary = ReplaySummary {
            outcome,
            events_emitted: progress.emitted,
            failed_sends: replay.gate.failed_sends(),
            last_domain_time: progress.last_domain_time,
            elapsed: started.elapsed(),
            source_error: progress.source_error,
        };
        info!(
            "replay finished ({:?}): {} events in {:.1?}",
            summary.outcome, summary.events_emitted, summary.elapsed
        );
        summary
    }
}

/// State of one `run`, shared by its phases.
struct Replay {
    config: ReplayConfig,
    sink: Arc<dyn Sink>,
    gate: BackpressureGate,
    cancel: CancellationToken,
}

impl Replay {
    async fn replay(
        &self,
        source: Box<dyn EventSource>,
        slot: &mut Option<ReplayBuffer>,
        progress: &mut Progress,
    ) -> ReplayOutcome {
        let buffer = match self.prime(source, slot, progress).await {
            Ok(buffer) => buffer,
            Err(outcome) => return outcome,
        };

        let outcome = self.drive(buffer, progress).await;
        if outcome == ReplayOutcome::Completed {
            if let Some(e) = buffer.source_error() {
                progress.source_error = Some(e);
                return ReplayOutcome::SourceFailed;
            }
            info!("all events have been sent");
        }
        outcome
    }

    async fn prime<'a>(
        &self,
        mut source: Box<dyn EventSource>,
        slot: &'a mut Option<ReplayBuffer>,
        progress: &mut Progress,
    ) -> Result<&'a ReplayBuffer, ReplayOutcome> {
        source.set_speedup(self.config.speedup);
        if let Some(target) = self.config.seek_to {
            info!("seeking to {}", target);
            let sought = tokio::select! {
                sought = source.seek(target) => sought,
                _ = self.cancel.cancelled() => return Err(ReplayOutcome::Cancelled),
            };
            if let Err(e) = sought {
                error!("seeking to {} failed: {}", target, e);
                progress.source_error = Some(e.to_string());
                return Err(ReplayOutcome::SourceFailed);
            }
        }

        let buffer = slot.insert(ReplayBuffer::new(
            source,
            self.config.buffer_size,
            self.cancel.child_token(),
        ));

        info!("populating replay buffer (capacity {})", buffer.capacity());
        if buffer.fill().await.is_err() {
            return Err(ReplayOutcome::Cancelled);
        }

        if buffer.peek().is_none() {
            if let Some(e) = buffer.source_error() {
                progress.source_error = Some(e);
                return Err(ReplayOutcome::SourceFailed);
            }
            error!("no events found to replay");
            return Err(ReplayOutcome::NoEvents);
        }

        Ok(&*buffer)
    }

    async fn drive(&self, buffer: &ReplayBuffer, progress: &mut Progress) -> ReplayOutcome {
        let mut stats = ThroughputStats::new(self.config.statistics_interval, Instant::now());
        let mut tracer = DryRunTracer::new(self.config.dry_run_trace_window);

        if self.config.dry_run {
            info!("dry run: events are logged, not sent");
        } else {
            info!("starting replay");
        }

        loop {
            let event = match buffer.take().await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(Interrupted) => return ReplayOutcome::Cancelled,
            };

            let due = event.scheduled_time();
            if due > Instant::now() {
                trace!("sleeping {:?}", due - Instant::now());
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = self.cancel.cancelled() => return ReplayOutcome::Cancelled,
                }
            }

            if self.emit(&event, &mut tracer).await.is_err() {
                return ReplayOutcome::Cancelled;
            }
            progress.emitted += 1;
            progress.last_domain_time = Some(event.domain_timestamp());

            if let Some(report) = stats.record(Instant::now()) {
                // The buffer head is the oldest event not yet submitted.
                let sent_up_to = buffer
                    .peek_timestamp()
                    .unwrap_or_else(|| event.domain_timestamp());
                info!(
                    "all events with domain time until {} have been submitted ({} events/sec, {} buffer size)",
                    sent_up_to,
                    report.events_per_second,
                    buffer.size()
                );
            }

            if !buffer.has_next() {
                break;
            }
        }

        ReplayOutcome::Completed
    }

    async fn emit(&self, event: &Event, tracer: &mut DryRunTracer) -> Result<(), Interrupted> {
        if self.config.dry_run {
            tracer.observe(event);
            return Ok(());
        }

        let key = event.partition_key();
        let payload = event.payload().clone();
        let sink = &self.sink;
        tokio::select! {
            _ = self.gate.acquire_for(|| sink.submit(&key, payload)) => {}
            _ = self.cancel.cancelled() => return Err(Interrupted),
        }
        trace!("sent event {} at {}", key, event.domain_timestamp());
        Ok(())
    }
}

/// Interrupt the buffer, then flush and close the sink if it was used.
async fn shutdown(buffer: Option<ReplayBuffer>, sink: Option<Arc<dyn Sink>>) {
    if let Some(buffer) = &buffer {
        buffer.interrupt().await;
    }
    let Some(sink) = sink else {
        return;
    };

    debug!("flushing sink");
    if let Err(e) = sink.flush().await {
        error!("flushing sink failed: {}", e);
    }
    if let Err(e) = sink.close().await {
        error!("closing sink failed: {}", e);
    }
}

/// Flushes and closes the sink in the background if `run` is dropped
/// before its shutdown phase starts.
struct CleanupOnDrop(Option<Arc<dyn Sink>>);

impl Drop for CleanupOnDrop {
    fn drop(&mut self) {
        let Some(sink) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("replay dropped mid-run, flushing sink in the background");
                handle.spawn(shutdown(None, Some(sink)));
            }
            Err(_) => warn!("replay dropped outside a runtime, sink left unflushed"),
        }
    }
}

/// Rate-limited stand-in for the sink in dry-run mode.
///
/// Logs an event only if none was logged yet, or its scheduled time is more
/// than one window after the last logged event.
#[derive(Debug, Clone)]
pub struct DryRunTracer {
    window: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl DryRunTracer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns whether `event` was logged.
    pub fn observe(&mut self, event: &Event) -> bool {
        let scheduled = event.scheduled_time();
        let due = match self.last {
            None => true,
            Some(last) => scheduled.saturating_duration_since(last) > self.window,
        };

        if !due {
            self.suppressed += 1;
            return false;
        }

        info!(
            "event: {} ({} similar suppressed)",
            String::from_utf8_lossy(event.payload()),
            self.suppressed
        );
        self.last = Some(scheduled);
        self.suppressed = 0;
        true
    }
}
