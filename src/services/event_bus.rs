//! Per-run event fan-out.
//!
//! Subscribers register a callback for one run. `emit` delivers synchronously,
//! in subscription order, to the subscribers present when the call began; a
//! panicking subscriber is logged and skipped so the rest still receive the
//! event. For async consumers, [`EventBus::stream`] bridges the callback into
//! an unbounded channel, so emitting never waits on a slow reader.

use futures::Stream;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::models::RunEvent;

type Callback = Arc<dyn Fn(&RunEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<HashMap<Uuid, Vec<Subscriber>>>,
    next_id: AtomicU64,
    emitted: AtomicU64,
}

impl BusInner {
    fn remove(&self, run_id: Uuid, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = subscribers.get_mut(&run_id) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                subscribers.remove(&run_id);
            }
        }
    }
}

/// Event bus for run events.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events of `run_id`.
    ///
    /// The subscription lasts until the returned handle is dropped or
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, run_id: Uuid, callback: F) -> Subscription
    where
        F: Fn(&RunEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(run_id)
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });

        Subscription {
            bus: Arc::downgrade(&self.inner),
            run_id,
            id,
        }
    }

    /// Live stream of a run's events, ending after the `complete` event.
    pub fn stream(&self, run_id: Uuid) -> RunEventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(run_id, move |event| {
            // Receiver gone means the stream was dropped; nothing to do.
            let _ = tx.send(event.clone());
        });
        RunEventStream {
            rx,
            run_id,
            subscription: Some(subscription),
            finished: false,
        }
    }

    /// Deliver `event` to the subscribers of `event.run_id`.
    pub fn emit(&self, event: &RunEvent) {
        let snapshot: Vec<Callback> = {
            let subscribers = self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers
                .get(&event.run_id)
                .map(|list| list.iter().map(|s| Arc::clone(&s.callback)).collect())
                .unwrap_or_default()
        };
        self.inner.emitted.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            run_id = %event.run_id,
            event_type = %event.event_type(),
            subscribers = snapshot.len(),
            "emitting run event"
        );
        deliver(event, &snapshot);
    }

    /// Deliver `event` to every subscriber of every run.
    pub fn emit_to_all(&self, event: &RunEvent) {
        let snapshot: Vec<Callback> = {
            let subscribers = self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers
                .values()
                .flat_map(|list| list.iter().map(|s| Arc::clone(&s.callback)))
                .collect()
        };
        self.inner.emitted.fetch_add(1, Ordering::Relaxed);
        deliver(event, &snapshot);
    }

    pub fn subscriber_count(&self, run_id: Uuid) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&run_id)
            .map_or(0, Vec::len)
    }

    /// Total events emitted since creation.
    pub fn emitted_count(&self) -> u64 {
        self.inner.emitted.load(Ordering::Relaxed)
    }
}

fn deliver(event: &RunEvent, callbacks: &[Callback]) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::error!(
                run_id = %event.run_id,
                event_type = %event.event_type(),
                "event subscriber panicked; continuing delivery"
            );
        }
    }
}

/// Handle for an active subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<BusInner>,
    run_id: Uuid,
    id: u64,
}

impl Subscription {
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.run_id, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("run_id", &self.run_id)
            .field("id", &self.id)
            .finish()
    }
}

/// Stream of one run's events. Ends after the terminal `complete` event.
pub struct RunEventStream {
    rx: mpsc::UnboundedReceiver<RunEvent>,
    run_id: Uuid,
    subscription: Option<Subscription>,
    finished: bool,
}

impl RunEventStream {
    /// A stream that yields nothing, for runs that already finished.
    pub fn finished() -> Self {
        let (_tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            run_id: Uuid::nil(),
            subscription: None,
            finished: true,
        }
    }
}

impl Stream for RunEventStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                // Broadcasts reach every stream; only this run's own completion ends it.
                if event.is_terminal() && event.run_id == self.run_id {
                    self.finished = true;
                    self.subscription = None;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
