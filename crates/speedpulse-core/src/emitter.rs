//! Per-session publish/subscribe hub for progress events.
//!
//! Each observer owns a bounded queue. [`EventHub::emit`] never waits: an
//! observer whose queue is closed (it went away) or full (it fell behind) is
//! removed and its stream ends. Neither case affects the run or the other
//! observers. After a terminal event the hub closes and later subscribers get
//! an already-finished stream.

use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::events::ProgressEvent;
use crate::metrics::METRICS;
use crate::obs;

#[derive(Debug)]
pub struct EventHub {
    session_id: String,
    capacity: usize,
    inner: Mutex<HubInner>,
}

#[derive(Debug, Default)]
struct HubInner {
    observers: Vec<Observer>,
    next_id: u64,
    closed: bool,
}

#[derive(Debug)]
struct Observer {
    id: u64,
    tx: mpsc::Sender<ProgressEvent>,
}

impl EventHub {
    /// `capacity` is the per-observer queue length; values below 1 are raised to 1.
    pub fn new(session_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            session_id: session_id.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(HubInner::default()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Register an observer. It sees every event emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.lock();
        if !inner.closed {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push(Observer { id, tx });
        }
        EventStream { rx }
    }

    /// Push `event` to every live observer. A terminal event closes the hub.
    pub fn emit(&self, event: ProgressEvent) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }

        let session_id = self.session_id.as_str();
        inner.observers.retain(|observer| {
            let reason = match observer.tx.try_send(event.clone()) {
                Ok(()) => return true,
                Err(TrySendError::Full(_)) => "queue_full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            METRICS.inc_observers_dropped();
            obs::emit_observer_dropped(session_id, observer.id, reason);
            false
        });

        if event.is_terminal() {
            inner.closed = true;
            // Dropping the senders ends every stream after the terminal event.
            inner.observers.clear();
        }
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One observer's view of a session: the events emitted since it subscribed,
/// ending after the terminal event.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
