//! Listener queues and fan-out.
//!
//! Every `/stream` connection owns one bounded FIFO of encoded chunks. The
//! registry (writer side) and the connection's `ClientStream` (reader side)
//! share it through an `Arc`, so either side may let go first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Result of a single pull on a listener queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextChunk {
    Chunk(Bytes),
    /// Nothing arrived within the idle timeout. The stream is still open.
    Timeout,
    /// The writer dropped this listener (overload or shutdown).
    Closed,
}

pub struct ClientQueue {
    id: Uuid,
    capacity: usize,
    buf: Mutex<VecDeque<Bytes>>,
    closed: AtomicBool,
    readable: Notify,
    writable: Notify,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            capacity: capacity.max(1),
            buf: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            closed: AtomicBool::new(false),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.readable.notify_one();
        self.writable.notify_one();
    }

    /// Discards everything queued so far.
    pub fn drain(&self) -> usize {
        let dropped = {
            let mut q = self.buf.lock();
            let n = q.len();
            q.clear();
            n
        };
        self.writable.notify_one();
        dropped
    }

    /// Enqueues `chunk`, waiting for space until `deadline`.
    ///
    /// Returns false if the queue is closed or stayed full past the deadline.
    pub async fn push(&self, chunk: Bytes, deadline: Instant) -> bool {
        loop {
            if self.is_closed() {
                return false;
            }
            {
                let mut q = self.buf.lock();
                if q.len() < self.capacity {
                    q.push_back(chunk);
                    drop(q);
                    self.readable.notify_one();
                    return true;
                }
            }
            if tokio::time::timeout_at(deadline, self.writable.notified()).await.is_err() {
                return false;
            }
        }
    }

    /// Pulls the oldest chunk, waiting up to `timeout` for one to arrive.
    ///
    /// Chunks already queued are still handed out after the queue is closed.
    pub async fn pop(&self, timeout: Duration) -> NextChunk {
        let deadline = Instant::now() + timeout;
        loop {
            let next = self.buf.lock().pop_front();
            if let Some(chunk) = next {
                self.writable.notify_one();
                return NextChunk::Chunk(chunk);
            }
            if self.is_closed() {
                return NextChunk::Closed;
            }
            if tokio::time::timeout_at(deadline, self.readable.notified()).await.is_err() {
                return NextChunk::Timeout;
            }
        }
    }
}

/// Reader half handed to a stream handler.
///
/// Dropping it closes the queue and runs the detach hook, which unregisters
/// the queue from the station.
pub struct ClientStream {
    queue: Arc<ClientQueue>,
    detach: Option<Box<dyn FnOnce(Uuid) + Send>>,
}

impl ClientStream {
    pub(crate) fn new(queue: Arc<ClientQueue>, detach: Box<dyn FnOnce(Uuid) + Send>) -> Self {
        Self { queue, detach: Some(detach) }
    }

    pub fn id(&self) -> Uuid {
        self.queue.id()
    }

    pub async fn next_chunk(&mut self, timeout: Duration) -> NextChunk {
        self.queue.pop(timeout).await
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(detach) = self.detach.take() {
            detach(self.queue.id());
        }
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    queues: Vec<Arc<ClientQueue>>,
}

impl ClientRegistry {
    pub fn register(&mut self, capacity: usize) -> Arc<ClientQueue> {
        let q = Arc::new(ClientQueue::new(capacity));
        self.queues.push(q.clone());
        q
    }

    pub fn unregister(&mut self, id: Uuid) -> bool {
        let before = self.queues.len();
        self.queues.retain(|q| q.id() != id);
        self.queues.len() != before
    }

    /// Live queues, pruning any that were closed from either side.
    pub fn live(&mut self) -> Vec<Arc<ClientQueue>> {
        self.queues.retain(|q| !q.is_closed());
        self.queues.clone()
    }

    pub fn len(&self) -> usize {
        self.queues.iter().filter(|q| !q.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn close_all(&mut self) {
        for q in self.queues.drain(..) {
            q.close();
        }
    }
}

/// Offers `chunk` to every queue concurrently.
///
/// Returns the queues that could not take it before `deadline`; the caller
/// drops those listeners.
pub async fn fan_out(
    queues: &[Arc<ClientQueue>],
    chunk: &Bytes,
    deadline: Duration,
) -> Vec<Arc<ClientQueue>> {
    let until = Instant::now() + deadline;
    let results = futures::future::join_all(
        queues.iter().map(|q| async move { (q, q.push(chunk.clone(), until).await) }),
    )
    .await;

    results
        .into_iter()
        .filter(|(q, ok)| !*ok && !q.is_closed())
        .map(|(q, _)| q.clone())
        .collect()
}

/// Empties every queue so no listener hears the tail of the previous track.
pub fn drain_all(queues: &[Arc<ClientQueue>]) -> usize {
    queues.iter().map(|q| q.drain()).sum()
}
