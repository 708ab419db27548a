// src/buffer.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Bounded prefetch queue between the event source and the scheduler.
//!
//! One background filler task pulls from the source and pushes into the
//! queue; the scheduler drains it. The filler suspends while the queue is at
//! capacity, which is what bounds prefetch memory. Every wait also watches a
//! cancellation token so [`ReplayBuffer::interrupt`] releases all parties.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::event::Event;
use crate::source::EventSource;

/// Returned by a suspension point released through cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("replay interrupted")]
pub struct Interrupted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// The filler may still produce.
    Open,
    /// The source is drained; remaining items can still be taken.
    Exhausted,
    /// Shut down; nothing is accepted or handed out.
    Interrupted,
}

struct Inner {
    queue: VecDeque<Event>,
    state: BufferState,
    source_error: Option<String>,
}

struct Shared {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, state: BufferState) {
        {
            let mut inner = self.lock();
            if inner.state == BufferState::Open {
                inner.state = state;
            }
        }
        self.not_empty.notify_waiters();
        self.not_empty.notify_one();
    }
}

/// Single-producer / single-consumer bounded event queue with a background filler.
pub struct ReplayBuffer {
    shared: Arc<Shared>,
    source: Mutex<Option<Box<dyn EventSource>>>,
    filler: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayBuffer {
    /// `cancel` releases every wait in this buffer; pass a child of the
    /// replay's token so that cancelling the replay also stops the filler.
    pub fn new(source: Box<dyn EventSource>, capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                inner: Mutex::new(Inner {
                    queue: VecDeque::with_capacity(capacity.clamp(1, 4096)),
                    state: BufferState::Open,
                    source_error: None,
                }),
                not_empty: Notify::new(),
                not_full: Notify::new(),
                cancel,
            }),
            source: Mutex::new(Some(source)),
            filler: Mutex::new(None),
        }
    }

    /// Launch the background filler. Later calls do nothing.
    pub fn start(&self) {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(source) = source else {
            return;
        };

        let handle = tokio::spawn(run_filler(Arc::clone(&self.shared), source));
        *self.filler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Wait until the queue is full or the source is drained.
    ///
    /// Starts the filler if that has not happened yet.
    pub async fn fill(&self) -> Result<(), Interrupted> {
        self.start();
        loop {
            if self.shared.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            {
                let inner = self.shared.lock();
                match inner.state {
                    BufferState::Interrupted => return Err(Interrupted),
                    BufferState::Exhausted => return Ok(()),
                    BufferState::Open if inner.queue.len() >= self.shared.capacity => return Ok(()),
                    BufferState::Open => {}
                }
            }
            tokio::select! {
                _ = self.shared.not_empty.notified() => {}
                _ = self.shared.cancel.cancelled() => return Err(Interrupted),
            }
        }
    }

    /// Remove the head event, waiting while the queue is empty and the source may
    /// still produce. `Ok(None)` marks the end of the stream.
    pub async fn take(&self) -> Result<Option<Event>, Interrupted> {
        loop {
            {
                let mut inner = self.shared.lock();
                if inner.state == BufferState::Interrupted || self.shared.cancel.is_cancelled() {
                    return Err(Interrupted);
                }
                if let Some(event) = inner.queue.pop_front() {
                    drop(inner);
                    self.shared.not_full.notify_one();
                    return Ok(Some(event));
                }
                if inner.state == BufferState::Exhausted {
                    return Ok(None);
                }
            }
            tokio::select! {
                _ = self.shared.not_empty.notified() => {}
                _ = self.shared.cancel.cancelled() => return Err(Interrupted),
            }
        }
    }

    /// Copy of the head event, without removing it.
    pub fn peek(&self) -> Option<Event> {
        self.shared.lock().queue.front().cloned()
    }

    /// Domain time of the head event.
    pub fn peek_timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.shared.lock().queue.front().map(Event::domain_timestamp)
    }

    /// True while an event is queued or the source may still produce one.
    pub fn has_next(&self) -> bool {
        let inner = self.shared.lock();
        !inner.queue.is_empty() || inner.state == BufferState::Open
    }

    pub fn size(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn state(&self) -> BufferState {
        self.shared.lock().state
    }

    /// Error that stopped the filler early, if any.
    pub fn source_error(&self) -> Option<String> {
        self.shared.lock().source_error.clone()
    }

    /// Stop the filler, drop queued events and release every waiter.
    ///
    /// Idempotent; returns once the filler task has finished.
    pub async fn interrupt(&self) {
        self.shared.cancel.cancel();

        let dropped = {
            let mut inner = self.shared.lock();
            inner.state = BufferState::Interrupted;
            let dropped = inner.queue.len();
            inner.queue.clear();
            dropped
        };
        self.shared.not_empty.notify_waiters();
        self.shared.not_full.notify_waiters();

        let filler = self
            .filler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(filler) = filler {
            if let Err(e) = filler.await {
                warn!("buffer filler ended abnormally: {}", e);
            }
            debug!("buffer interrupted, {} queued events dropped", dropped);
        }
    }
}

impl Drop for ReplayBuffer {
    fn drop(&mut self) {
        // The filler observes the token at every await and exits on its own.
        self.shared.cancel.cancel();
    }
}

/// Ends the stream if the filler exits without doing so itself, e.g. when the
/// source panics, so that `fill` and `take` cannot wait forever.
struct FillerGuard(Arc<Shared>);

impl Drop for FillerGuard {
    fn drop(&mut self) {
        if self.0.cancel.is_cancelled() {
            return;
        }
        {
            let mut inner = self.0.lock();
            if inner.state != BufferState::Open {
                return;
            }
            error!("buffer filler aborted before the source was drained");
            inner
                .source_error
                .get_or_insert_with(|| "buffer filler aborted".to_string());
        }
        self.0.finish(BufferState::Exhausted);
    }
}

async fn run_filler(shared: Arc<Shared>, mut source: Box<dyn EventSource>) {
    let _guard = FillerGuard(Arc::clone(&shared));
    let mut produced = 0u64;
    loop {
        // Wait for a free slot before reading, so occupancy never exceeds capacity.
        loop {
            {
                let inner = shared.lock();
                if inner.state != BufferState::Open {
                    return;
                }
                if inner.queue.len() < shared.capacity {
                    break;
                }
            }
            tokio::select! {
                _ = shared.not_full.notified() => {}
                _ = shared.cancel.cancelled() => return,
            }
        }

        let next = tokio::select! {
            next = source.next_event() => next,
            _ = shared.cancel.cancelled() => return,
        };

        match next {
            Ok(Some(event)) => {
                {
                    let mut inner = shared.lock();
                    if inner.state != BufferState::Open {
                        return;
                    }
                    inner.queue.push_back(event);
                }
                produced += 1;
                shared.not_empty.notify_one();
            }
            Ok(None) => {
                debug!("source drained after {} events", produced);
                shared.finish(BufferState::Exhausted);
                return;
            }
            Err(e) => {
                error!("reading from source failed: {}", e);
                shared.lock().source_error = Some(e.to_string());
                shared.finish(BufferState::Exhausted);
                return;
            }
        }
    }
}
