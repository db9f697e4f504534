//! Stream duplication for serving and storing at once
//!
//! The store branch sets the pace: it reads through a bounded channel, so the
//! origin is never pulled faster than the store accepts. The caller branch
//! never holds the pump back. Up to `memory_limit` bytes queue in memory for
//! it and anything beyond that is spilled to a temporary file, so a slow or
//! stalled client cannot delay the store write.

use bucket_store::ByteStream;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::warn;

type Item = io::Result<Bytes>;

/// Largest chunk handed to the caller when reading back spilled bytes
const SPILL_READ_CHUNK: usize = 64 * 1024;

/// Split `source` into a caller branch and a store branch yielding the same
/// chunks.
///
/// The store branch buffers at most `capacity` chunks. Dropping either branch
/// does not stop the other. A source error is delivered to both branches and
/// ends them.
///
/// Must be called from within a Tokio runtime.
pub fn tee(
    mut source: ByteStream,
    capacity: usize,
    memory_limit: usize,
) -> (ByteStream, ByteStream) {
    let (store_tx, store_rx) = mpsc::channel::<Item>(capacity.max(1));
    let queue = Arc::new(SpillQueue::new(memory_limit));
    let caller = caller_stream(Arc::clone(&queue));

    tokio::spawn(async move {
        let mut store_tx = Some(store_tx);
        let mut queue = Some(queue);

        while let Some(item) = source.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    if let Some(queue) = &queue {
                        queue.finish(Some(io::Error::new(e.kind(), e.to_string()))).await;
                    }
                    if let Some(tx) = &store_tx {
                        let _ = tx.send(Err(e)).await;
                    }
                    return;
                }
            };

            if let Some(q) = &queue {
                if q.is_abandoned() {
                    queue = None;
                } else if let Err(e) = q.push(chunk.clone()).await {
                    warn!(error = %e, "Failed to buffer response for caller");
                    q.finish(Some(e)).await;
                    queue = None;
                }
            }

            if let Some(tx) = &store_tx {
                if tx.send(Ok(chunk)).await.is_err() {
                    store_tx = None;
                }
            }

            if queue.is_none() && store_tx.is_none() {
                return;
            }
        }

        if let Some(queue) = queue {
            queue.finish(None).await;
        }
    });

    (caller, receiver_stream(store_rx))
}

fn receiver_stream(rx: mpsc::Receiver<Item>) -> ByteStream {
    stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    })
    .boxed()
}

/// Marks the queue abandoned when the caller stream is dropped
struct CallerHandle(Arc<SpillQueue>);

impl Drop for CallerHandle {
    fn drop(&mut self) {
        self.0.abandoned.store(true, Ordering::Release);
    }
}

fn caller_stream(queue: Arc<SpillQueue>) -> ByteStream {
    stream::unfold(CallerHandle(queue), |handle| async move {
        let item = handle.0.pop().await?;
        Some((item, handle))
    })
    .boxed()
}

/// Single-producer, single-consumer chunk queue that never blocks the
/// producer on the consumer.
struct SpillQueue {
    state: Mutex<QueueState>,
    ready: Notify,
    abandoned: AtomicBool,
    memory_limit: usize,
}

#[derive(Default)]
struct QueueState {
    memory: VecDeque<Bytes>,
    memory_bytes: usize,
    /// Holds everything pushed while spilled bytes are still unread, which
    /// keeps chunks in order
    spill: Option<Spill>,
    error: Option<io::Error>,
    finished: bool,
}

struct Spill {
    writer: File,
    reader: File,
    unread: u64,
    _path: TempPath,
}

impl Spill {
    async fn create() -> io::Result<Self> {
        let (file, path) = NamedTempFile::new()?.into_parts();
        let reader = File::open(&path).await?;
        Ok(Self {
            writer: File::from_std(file),
            reader,
            unread: 0,
            _path: path,
        })
    }
}

impl SpillQueue {
    fn new(memory_limit: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Notify::new(),
            abandoned: AtomicBool::new(false),
            memory_limit,
        }
    }

    fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }

    async fn push(&self, chunk: Bytes) -> io::Result<()> {
        let mut state = self.state.lock().await;

        let fits = state.memory.is_empty() || state.memory_bytes + chunk.len() <= self.memory_limit;
        if state.spill.is_none() && fits {
            state.memory_bytes += chunk.len();
            state.memory.push_back(chunk);
        } else {
            if state.spill.is_none() {
                state.spill = Some(Spill::create().await?);
            }
            if let Some(spill) = state.spill.as_mut() {
                spill.writer.write_all(&chunk).await?;
                spill.writer.flush().await?;
                spill.unread += chunk.len() as u64;
            }
        }

        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    async fn finish(&self, error: Option<io::Error>) {
        let mut state = self.state.lock().await;
        state.error = error;
        state.finished = true;
        drop(state);
        self.ready.notify_one();
    }

    async fn pop(&self) -> Option<Item> {
        loop {
            {
                let mut state = self.state.lock().await;

                if let Some(chunk) = state.memory.pop_front() {
                    state.memory_bytes -= chunk.len();
                    return Some(Ok(chunk));
                }

                if let Some(spill) = state.spill.as_mut() {
                    if spill.unread > 0 {
                        let len = spill.unread.min(SPILL_READ_CHUNK as u64) as usize;
                        let mut buf = vec![0u8; len];
                        if let Err(e) = spill.reader.read_exact(&mut buf).await {
                            state.spill = None;
                            state.finished = true;
                            return Some(Err(e));
                        }
                        spill.unread -= len as u64;
                        return Some(Ok(Bytes::from(buf)));
                    }
                    // Drained; back to memory for whatever comes next
                    state.spill = None;
                }

                if let Some(e) = state.error.take() {
                    return Some(Err(e));
                }
                if state.finished {
                    return None;
                }
            }

            self.ready.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::time::Duration;

    const MEMORY_LIMIT: usize = 8 * 1024 * 1024;

    fn source(chunks: Vec<Item>) -> ByteStream {
        stream::iter(chunks).boxed()
    }

    async fn collect(stream: ByteStream) -> io::Result<Vec<u8>> {
        stream.map_ok(|chunk| chunk.to_vec()).try_concat().await
    }

    fn numbered_chunks(count: u8, size: usize) -> (Vec<Item>, Vec<u8>) {
        let chunks = (0..count).map(|i| Ok(Bytes::from(vec![i; size]))).collect();
        let expected = (0..count).flat_map(|i| vec![i; size]).collect();
        (chunks, expected)
    }

    #[tokio::test]
    async fn test_both_branches_see_identical_bytes() {
        let (chunks, expected) = numbered_chunks(50, 1024);

        let (caller, store) = tee(source(chunks), 2, MEMORY_LIMIT);
        let (caller, store) = tokio::join!(collect(caller), collect(store));

        assert_eq!(caller.unwrap(), expected);
        assert_eq!(store.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_block_store() {
        let (chunks, expected) = numbered_chunks(20, 1);

        let (caller, store) = tee(source(chunks), 1, MEMORY_LIMIT);
        drop(caller);

        assert_eq!(collect(store).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_dropped_store_does_not_block_caller() {
        let (chunks, expected) = numbered_chunks(20, 1);

        let (caller, store) = tee(source(chunks), 1, MEMORY_LIMIT);
        drop(store);

        assert_eq!(collect(caller).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_source_error_reaches_both_branches() {
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "origin reset")),
            Ok(Bytes::from_static(b"never delivered")),
        ];

        let (caller, store) = tee(source(chunks), 4, MEMORY_LIMIT);
        let (caller, store) = tokio::join!(collect(caller), collect(store));

        let caller = caller.unwrap_err();
        let store = store.unwrap_err();
        assert_eq!(caller.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(store.kind(), io::ErrorKind::ConnectionReset);
        assert!(caller.to_string().contains("origin reset"));
    }

    #[tokio::test]
    async fn test_unread_caller_does_not_hold_back_store() {
        let (chunks, expected) = numbered_chunks(64, 4096);

        // The caller branch is kept alive but never polled
        let (_caller, store) = tee(source(chunks), 1, 16 * 1024);

        let stored = tokio::time::timeout(Duration::from_secs(5), collect(store))
            .await
            .expect("store branch stalled behind an unread caller");
        assert_eq!(stored.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_spilled_bytes_come_back_in_order() {
        let (chunks, expected) = numbered_chunks(40, 3000);

        let (caller, store) = tee(source(chunks), 1, 4096);
        // Drain the store first so most of the caller's data ends up on disk
        assert_eq!(collect(store).await.unwrap(), expected);

        assert_eq!(collect(caller).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_store_branch_is_bounded() {
        let (tx, rx) = mpsc::channel::<Item>(64);
        let (_caller, mut store) = tee(receiver_stream(rx), 2, MEMORY_LIMIT);

        for i in 0..8u8 {
            tx.send(Ok(Bytes::from(vec![i]))).await.unwrap();
        }

        // Two chunks queued for the store plus one in hand, the rest stay
        // with the source
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tx.capacity() <= 64 - 5);

        drop(tx);
        let mut seen = Vec::new();
        while let Some(item) = store.next().await {
            seen.extend_from_slice(&item.unwrap());
        }
        assert_eq!(seen, (0..8u8).collect::<Vec<_>>());
    }
}
