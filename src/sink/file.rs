// src/sink/file.rs
//
// SPDX-License-Identifier: Apache-2.0 OR MIT
// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>

//! JSON-lines sink backed by a background writer task.
//!
//! `submit` only enqueues; the writer drains the queue in batches, writes
//! each payload as one line to the partition selected by its key, flushes,
//! and only then resolves the batch's pending sends.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{CompletionHandle, PendingSend, Sink, SinkError, pending_send};
use crate::constants::DEFAULT_SINK_BATCH_SIZE;

type PartitionWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

enum Command {
    Write {
        partition: usize,
        payload: Bytes,
        done: CompletionHandle,
    },
    Flush(oneshot::Sender<Result<(), SinkError>>),
    Close(oneshot::Sender<Result<(), SinkError>>),
}

/// Writes every record as one line of output, partitioned by key.
///
/// Target `-` is stdout. With one partition any other target is a file
/// path; with more, it is a directory receiving `part-NNNNN.jsonl` files.
/// A `file://` prefix is accepted.
pub struct JsonLinesSink {
    tx: mpsc::UnboundedSender<Command>,
    partitions: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JsonLinesSink {
    pub async fn create(target: &str, partitions: usize) -> Result<Self, SinkError> {
        let partitions = partitions.max(1);

        let writers: Vec<Box<dyn AsyncWrite + Send + Unpin>> = if target == "-" {
            vec![Box::new(tokio::io::stdout())]
        } else {
            let path = PathBuf::from(target.strip_prefix("file://").unwrap_or(target));
            if partitions == 1 {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                vec![Box::new(tokio::fs::File::create(&path).await?)]
            } else {
                tokio::fs::create_dir_all(&path).await?;
                let mut files: Vec<Box<dyn AsyncWrite + Send + Unpin>> = Vec::with_capacity(partitions);
                for i in 0..partitions {
                    let file = tokio::fs::File::create(path.join(partition_file_name(i))).await?;
                    files.push(Box::new(file));
                }
                files
            }
        };

        info!("writing {} partition(s) to {}", writers.len(), target);
        Ok(Self::from_writers(writers))
    }

    /// Sink over caller-provided writers, one per partition.
    pub fn from_writers(writers: Vec<Box<dyn AsyncWrite + Send + Unpin>>) -> Self {
        Self::with_batch_size(writers, DEFAULT_SINK_BATCH_SIZE)
    }

    pub fn with_batch_size(writers: Vec<Box<dyn AsyncWrite + Send + Unpin>>, batch_size: usize) -> Self {
        let writers: Vec<PartitionWriter> = writers.into_iter().map(BufWriter::new).collect();
        let partitions = writers.len();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_writer(rx, writers, batch_size.max(1)));

        Self {
            tx,
            partitions,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Partition receiving records submitted with `key`.
    pub fn partition_for(&self, key: &str) -> usize {
        partition_for(key, self.partitions)
    }

    async fn request(&self, make: fn(oneshot::Sender<Result<(), SinkError>>) -> Command) -> Result<(), SinkError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(make(ack_tx)).map_err(|_| SinkError::Closed)?;
        ack_rx.await.map_err(|_| SinkError::Dropped)?
    }
}

pub fn partition_file_name(index: usize) -> String {
    format!("part-{:05}.jsonl", index)
}

fn partition_for(key: &str, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    crc32fast::hash(key.as_bytes()) as usize % partitions
}

#[async_trait]
impl Sink for JsonLinesSink {
    fn submit(&self, key: &str, payload: Bytes) -> PendingSend {
        if self.partitions == 0 {
            return PendingSend::ready(Err(SinkError::Closed));
        }

        let (done, pending) = pending_send();
        let command = Command::Write {
            partition: self.partition_for(key),
            payload,
            done,
        };
        match self.tx.send(command) {
            Ok(()) => pending,
            Err(mpsc::error::SendError(Command::Write { done, .. })) => {
                done.complete(Err(SinkError::Closed));
                pending
            }
            Err(_) => PendingSend::ready(Err(SinkError::Closed)),
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.request(Command::Flush).await
    }

    async fn close(&self) -> Result<(), SinkError> {
        let result = match self.request(Command::Close).await {
            // Already closed by an earlier call.
            Err(SinkError::Closed) => Ok(()),
            other => other,
        };

        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                error!("sink writer task failed: {}", e);
            }
        }
        result
    }
}

/// Writes that reached the buffer but are not yet flushed.
type Unsettled = Vec<(CompletionHandle, io::Result<()>)>;

async fn run_writer(
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut writers: Vec<PartitionWriter>,
    batch_size: usize,
) {
    let mut batch = Vec::with_capacity(batch_size);
    let mut unsettled: Unsettled = Vec::with_capacity(batch_size);
    let mut closed = false;

    while rx.recv_many(&mut batch, batch_size).await > 0 {
        for command in batch.drain(..) {
            match command {
                Command::Write {
                    partition,
                    payload,
                    done,
                } => {
                    if closed {
                        done.complete(Err(SinkError::Closed));
                        continue;
                    }
                    let writer = &mut writers[partition];
                    let written = write_line(writer, &payload).await;
                    unsettled.push((done, written));
                }
                Command::Flush(ack) => {
                    let result = if closed {
                        Err(SinkError::Closed)
                    } else {
                        settle(&mut writers, &mut unsettled).await
                    };
                    let _ = ack.send(result);
                }
                Command::Close(ack) => {
                    if closed {
                        let _ = ack.send(Err(SinkError::Closed));
                        continue;
                    }
                    let mut result = settle(&mut writers, &mut unsettled).await;
                    for writer in writers.iter_mut() {
                        if let Err(e) = writer.shutdown().await {
                            result = result.and(Err(SinkError::Io(e)));
                        }
                    }
                    closed = true;
                    rx.close();
                    debug!("sink writer closed");
                    let _ = ack.send(result);
                }
            }
        }

        if !closed {
            if let Err(e) = settle(&mut writers, &mut unsettled).await {
                error!("sink flush failed: {}", e);
            }
        }
    }

    // Every sender is gone without a close; resolve whatever is left.
    if let Err(e) = settle(&mut writers, &mut unsettled).await {
        error!("sink flush failed: {}", e);
    }
}

async fn write_line(writer: &mut PartitionWriter, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload).await?;
    writer.write_all(b"\n").await
}

/// Flush every partition, then resolve the writes buffered since the last settle.
async fn settle(writers: &mut [PartitionWriter], unsettled: &mut Unsettled) -> Result<(), SinkError> {
    let mut flush_error: Option<io::Error> = None;
    for writer in writers.iter_mut() {
        if let Err(e) = writer.flush().await {
            flush_error.get_or_insert(e);
        }
    }

    for (done, written) in unsettled.drain(..) {
        let result = match (&flush_error, written) {
            (_, Err(e)) => Err(SinkError::Io(e)),
            (Some(e), Ok(())) => Err(SinkError::Io(io::Error::new(e.kind(), e.to_string()))),
            (None, Ok(())) => Ok(()),
        };
        done.complete(result);
    }

    match flush_error {
        Some(e) => Err(SinkError::Io(e)),
        None => Ok(()),
    }
}
