//! Outbound queue and the write pump that drains it.
//!
//! Every producer (receive loop, ticker) pushes pre-encoded envelopes into
//! one [`OutboundQueue`]; a single write pump sends them in push order.
//! Pushing never waits. The queue is bounded: at capacity the oldest
//! [`Retention::Droppable`] envelope is evicted, and [`Retention::Retained`]
//! envelopes (deltas, acknowledgements) are never evicted.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use framerelay_protocol::constants::EnvelopeType;
use framerelay_protocol::envelope::Envelope;
use futures_util::{Sink, SinkExt};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

/// Whether an envelope may be evicted under backpressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Periodic status and snapshots; a newer one supersedes it.
    Droppable,
    /// Deltas and start/end acknowledgements.
    Retained,
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest droppable envelope.
    Evicted(EnvelopeType),
    /// The queue was full of retained envelopes; the new droppable one was discarded.
    Discarded,
}

/// Error returned when pushing to a closed queue.
#[derive(Debug, thiserror::Error)]
#[error("outbound queue closed")]
pub struct QueueClosed;

#[derive(Debug)]
struct Queued {
    kind: EnvelopeType,
    retention: Retention,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: VecDeque<Queued>,
    closed: bool,
    evicted: u64,
}

/// FIFO of encoded envelopes for one connection.
#[derive(Debug)]
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    /// Creates a queue holding up to `capacity` envelopes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encodes and enqueues an envelope.
    pub fn push(&self, envelope: &Envelope, retention: Retention) -> Result<PushOutcome, QueueClosed> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(QueueClosed);
        }

        let mut outcome = PushOutcome::Queued;
        if inner.items.len() >= self.capacity {
            let oldest_droppable = inner
                .items
                .iter()
                .position(|q| q.retention == Retention::Droppable);
            match (oldest_droppable, retention) {
                (Some(idx), _) => {
                    if let Some(old) = inner.items.remove(idx) {
                        inner.evicted += 1;
                        outcome = PushOutcome::Evicted(old.kind);
                    }
                }
                (None, Retention::Droppable) => {
                    inner.evicted += 1;
                    tracing::warn!(kind = ?envelope.kind, "outbound queue full, discarding envelope");
                    return Ok(PushOutcome::Discarded);
                }
                // Retained envelopes are admitted past capacity.
                (None, Retention::Retained) => {}
            }
        }

        if let PushOutcome::Evicted(kind) = outcome {
            tracing::warn!(evicted = ?kind, total = inner.evicted, "outbound queue full, evicted oldest envelope");
        }

        inner.items.push_back(Queued {
            kind: envelope.kind,
            retention,
            bytes: envelope.encode(),
        });
        drop(inner);
        self.notify.notify_one();
        Ok(outcome)
    }

    /// Waits for the next envelope.
    ///
    /// Returns `None` once the queue is closed and empty. Cancel-safe: an
    /// envelope is only removed when the future completes.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item.bytes);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Removes the next envelope without waiting.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        self.lock().items.pop_front().map(|q| q.bytes)
    }

    /// Refuses further pushes; queued envelopes stay poppable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Number of envelopes evicted or discarded under backpressure.
    pub fn evicted_count(&self) -> u64 {
        self.lock().evicted
    }
}

/// Write pump: sends queued envelopes as binary WebSocket messages, in order.
///
/// Stops when cancelled, when the queue is closed and drained, or on the
/// first send error. A send error cancels `cancel` so the rest of the
/// connection winds down too. Cancellation also interrupts a send or close
/// that the peer is not reading.
pub(crate) async fn write_pump<S>(mut sink: S, queue: &OutboundQueue, cancel: CancellationToken)
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            next = queue.pop() => {
                let Some(bytes) = next else {
                    break; // Closed and drained.
                };
                let sent = tokio::select! {
                    _ = cancel.cancelled() => break,
                    res = sink.send(WsMessage::Binary(bytes.into())) => res,
                };
                if let Err(e) = sent {
                    tracing::error!("write pump send error: {e}");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    tokio::select! {
        biased;
        _ = sink.close() => {}
        _ = cancel.cancelled() => {}
    }
}
