//! In-process fan-out of "jobs changed" signals to connected viewers.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a
//! subscriber whose queue is full or whose receiver is gone is evicted and
//! its stream ends, so the viewer reconnects and re-fetches.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    JobsChanged,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::JobsChanged => "jobs_changed",
        }
    }
}

/// Content-free change signal. `seq` increases by one per publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub event: ChangeEvent,
    pub delivered: usize,
    pub evicted: usize,
}

struct BusInner {
    subscribers: DashMap<SubscriberId, mpsc::Sender<ChangeEvent>>,
    // Held across sequencing and fan-out so every subscriber sees publish order.
    last_seq: Mutex<u64>,
    next_id: AtomicU64,
    buffer: usize,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                last_seq: Mutex::new(0),
                next_id: AtomicU64::new(1),
                buffer: subscriber_buffer.max(1),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner.subscribers.insert(id, tx);
        tracing::debug!(subscriber = id.0, "viewer subscribed");
        Subscription {
            id,
            rx,
            bus: Arc::clone(&self.inner),
        }
    }

    /// Remove a subscriber. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.remove(id);
    }

    pub fn publish(&self, kind: ChangeKind) -> PublishOutcome {
        let mut last_seq = self
            .inner
            .last_seq
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_seq += 1;
        let event = ChangeEvent {
            seq: *last_seq,
            at: Utc::now(),
            kind,
        };

        let mut delivered = 0;
        let mut dropped = Vec::new();
        for entry in self.inner.subscribers.iter() {
            match entry.value().try_send(event) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = entry.key().0, seq = event.seq, "subscriber backlogged; evicting");
                    dropped.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber = entry.key().0, seq = event.seq, "subscriber gone; evicting");
                    dropped.push(*entry.key());
                }
            }
        }
        for id in &dropped {
            self.inner.subscribers.remove(id);
        }

        PublishOutcome {
            event,
            delivered,
            evicted: dropped.len(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers.len())
            .field("buffer", &self.inner.buffer)
            .finish()
    }
}

impl BusInner {
    fn remove(&self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            tracing::debug!(subscriber = id.0, "viewer unsubscribed");
        }
    }
}

/// One viewer session. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<ChangeEvent>,
    bus: Arc<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next buffered event, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next event. `None` once the subscriber was evicted or
    /// unsubscribed and its buffer is drained.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.remove(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
