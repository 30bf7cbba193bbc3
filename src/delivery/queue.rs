//! Unbounded FIFO bridging the blocking response worker and the async
//! transport.
//!
//! [`Outbox::put`] never blocks, so it is safe to call from the worker
//! thread. [`OutputQueue::get`] suspends the consuming task until an item is
//! available.

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::models::chunk::{Chunk, Frame};

/// Producer half, cloned into each response cycle.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Frame>,
}

impl Outbox {
    /// Enqueue an item. Items are dropped if the consumer has gone away.
    pub fn put(&self, frame: impl Into<Frame>) {
        if self.tx.send(frame.into()).is_err() {
            debug!("output queue closed; dropping outbound item");
        }
    }

    /// Enqueue an error chunk followed by the completion sentinel.
    pub fn put_failure(&self, diagnostic: impl Into<String>) {
        self.put(Chunk::error(diagnostic));
        self.put(Chunk::complete());
    }
}

/// Consumer half.
///
/// Consumption is serialized behind an async mutex so several transport
/// connections may share one queue; each item goes to exactly one of them.
#[derive(Debug)]
pub struct OutputQueue {
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
}

impl OutputQueue {
    /// Wait for the next item. Returns `None` once every [`Outbox`] is dropped
    /// and the queue is drained.
    pub async fn get(&self) -> Option<Frame> {
        self.rx.lock().await.recv().await
    }

    /// Take the next item if one is ready.
    pub fn try_get(&self) -> Option<Frame> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

/// Create a connected producer/consumer pair.
#[must_use]
pub fn channel() -> (Outbox, OutputQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Outbox { tx }, OutputQueue { rx: Mutex::new(rx) })
}
