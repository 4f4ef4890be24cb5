//! Fire-and-forget hand-off from the mutation path to notification delivery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::sink::NotificationDispatcher;
use crate::types::NotificationMessage;

/// Accepts a notification and returns immediately. Never reports failure.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: NotificationMessage);
}

/// Drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, message: NotificationMessage) {
        tracing::debug!(topic = ?message.topic, "notifications disabled; dropping message");
    }
}

/// Delivers notifications on a dedicated worker thread.
///
/// The queue holds at most `capacity` messages; anything beyond that is
/// dropped with a warning while the worker is stuck retrying a sink.
/// Dropping the notifier closes the queue and waits for queued messages to
/// finish delivery.
pub struct BackgroundNotifier {
    tx: Option<SyncSender<NotificationMessage>>,
    worker: Option<JoinHandle<()>>,
    dispatcher: Arc<NotificationDispatcher>,
    dropped: AtomicUsize,
}

impl BackgroundNotifier {
    pub fn spawn(dispatcher: NotificationDispatcher, capacity: usize) -> std::io::Result<Self> {
        let dispatcher = Arc::new(dispatcher);
        let (tx, rx) = mpsc::sync_channel::<NotificationMessage>(capacity.max(1));
        let worker_dispatcher = Arc::clone(&dispatcher);
        let worker = thread::Builder::new()
            .name("dispatch-notify".to_string())
            .spawn(move || {
                for message in rx {
                    for (sink, result) in worker_dispatcher.dispatch(&message) {
                        if let Err(err) = result {
                            tracing::warn!(sink = ?sink, topic = ?message.topic, error = %err, "notification not delivered");
                        }
                    }
                }
                tracing::debug!("notification worker stopped");
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            dispatcher,
            dropped: AtomicUsize::new(0),
        })
    }

    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Messages refused because the queue was full.
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Notifier for BackgroundNotifier {
    fn notify(&self, message: NotificationMessage) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic = ?message.topic, job_id = ?message.job_id, "notification queue full; dropping message");
            }
            Err(TrySendError::Disconnected(message)) => {
                tracing::warn!(topic = ?message.topic, "notification worker is gone; dropping message");
            }
        }
    }
}

impl Drop for BackgroundNotifier {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("notification worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for BackgroundNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundNotifier")
            .field("sinks", &self.dispatcher.sink_kinds())
            .field("running", &self.worker.is_some())
            .field("dropped", &self.dropped_count())
            .finish()
    }
}
