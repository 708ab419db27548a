// src/sink/mod.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! Destination side of a replay.
//!
//! A [`Sink`] accepts records without blocking and hands back a
//! [`PendingSend`] that resolves once the record has been delivered (or has
//! failed). Batching, retries and partitioning are the sink's own business.

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

pub mod file;

pub use file::JsonLinesSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink is closed")]
    Closed,

    #[error("sink dropped the operation before completing it")]
    Dropped,

    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Asynchronous record destination.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Queue one record for delivery. Must not block.
    fn submit(&self, key: &str, payload: Bytes) -> PendingSend;

    /// Block until everything submitted so far has been delivered.
    async fn flush(&self) -> Result<(), SinkError>;

    /// Release sink resources. No submissions are accepted afterwards.
    async fn close(&self) -> Result<(), SinkError>;
}

/// Create a linked completion handle / pending operation pair.
pub fn pending_send() -> (CompletionHandle, PendingSend) {
    let (tx, rx) = oneshot::channel();
    (CompletionHandle { tx }, PendingSend { rx })
}

/// Sink-side half: resolves exactly one [`PendingSend`].
#[derive(Debug)]
pub struct CompletionHandle {
    tx: oneshot::Sender<Result<(), SinkError>>,
}

impl CompletionHandle {
    pub fn complete(self, result: Result<(), SinkError>) {
        // Nobody waiting is fine: fire-and-forget callers drop the PendingSend.
        let _ = self.tx.send(result);
    }
}

/// Caller-side half of a submitted record.
///
/// Resolves to the delivery result. If the sink drops the matching
/// [`CompletionHandle`] without completing it, resolves to
/// [`SinkError::Dropped`], so observers are always released.
#[derive(Debug)]
pub struct PendingSend {
    rx: oneshot::Receiver<Result<(), SinkError>>,
}

impl PendingSend {
    /// An operation that is already resolved.
    pub fn ready(result: Result<(), SinkError>) -> Self {
        let (handle, pending) = pending_send();
        handle.complete(result);
        pending
    }
}

impl Future for PendingSend {
    type Output = Result<(), SinkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(SinkError::Dropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
