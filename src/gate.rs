// src/gate.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Counting admission control for asynchronous sink sends.
//!
//! Each permit is tied to exactly one [`PendingSend`] and is returned when
//! that send resolves, whether it succeeded or failed. The underlying tokio
//! semaphore queues waiters in FIFO order and wakes one waiter per release.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

use crate::config::Backpressure;
use crate::sink::PendingSend;

#[derive(Debug)]
struct GateInner {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Bounds the number of unresolved sends.
///
/// A disabled gate is a separate state rather than an unbounded capacity:
/// acquiring from it touches no shared state at all.
#[derive(Debug, Clone)]
pub struct BackpressureGate {
    inner: Option<Arc<GateInner>>,
}

impl BackpressureGate {
    pub fn new(mode: Backpressure) -> Self {
        match mode {
            Backpressure::Bounded(capacity) => Self::bounded(capacity),
            Backpressure::Disabled => Self::disabled(),
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            inner: Some(Arc::new(GateInner {
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity)),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            })),
        }
    }

    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Maximum permits, or `None` when disabled.
    pub fn capacity(&self) -> Option<usize> {
        self.inner.as_ref().map(|inner| inner.capacity)
    }

    /// Permits currently held by unresolved sends.
    pub fn outstanding(&self) -> usize {
        self.inner
            .as_ref()
            .map(|inner| inner.capacity - inner.semaphore.available_permits())
            .unwrap_or(0)
    }

    /// Sends observed to resolve, successfully or not.
    pub fn completed_sends(&self) -> u64 {
        self.inner
            .as_ref()
            .map(|inner| inner.completed.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sends observed to resolve with an error.
    pub fn failed_sends(&self) -> u64 {
        self.inner
            .as_ref()
            .map(|inner| inner.failed.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Take one permit, suspending while all permits are held.
    ///
    /// Returns immediately when the gate is disabled. Cancel by dropping the
    /// future; no permit is consumed in that case.
    pub async fn acquire(&self) -> GatePermit {
        let Some(inner) = &self.inner else {
            return GatePermit { slot: None };
        };

        // The semaphore is never closed, so this only fails if that changes;
        // fall back to an unbound permit rather than failing the caller.
        let permit = inner.semaphore.clone().acquire_owned().await.ok();
        GatePermit {
            slot: permit.map(|permit| (permit, Arc::clone(inner))),
        }
    }

    /// Acquire a permit, run `submit`, and bind the permit to the send it returns.
    pub async fn acquire_for<F>(&self, submit: F)
    where
        F: FnOnce() -> PendingSend,
    {
        let permit = self.acquire().await;
        permit.release_on(submit());
    }
}

/// A permit taken from a [`BackpressureGate`], not yet bound to a send.
///
/// Dropping an unbound permit returns it to the gate.
#[derive(Debug)]
#[must_use = "bind the permit to the send it guards with `release_on`"]
pub struct GatePermit {
    slot: Option<(OwnedSemaphorePermit, Arc<GateInner>)>,
}

impl GatePermit {
    /// Register the completion observer: the permit is released exactly once,
    /// when `pending` resolves.
    ///
    /// For a disabled gate the send is fire-and-forget and nothing observes it.
    pub fn release_on(self, pending: PendingSend) {
        let Some((permit, inner)) = self.slot else {
            return;
        };

        tokio::spawn(async move {
            match pending.await {
                Ok(()) => trace!("send completed"),
                Err(e) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    warn!("send failed: {}", e);
                }
            }
            inner.completed.fetch_add(1, Ordering::Relaxed);
            drop(permit);
        });
    }
}
