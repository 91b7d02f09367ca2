//! Connection lifecycle events.
//!
//! # Responsibilities
//! - Define the events observers can receive
//! - Fan each event out to every registered observer callback
//! - Offer the same events as a broadcast stream
//!
//! # Design Decisions
//! - Each observer runs in isolation: a panicking callback is logged and the
//!   remaining observers still receive the event
//! - Callbacks run synchronously on the emitting task and must be quick
//! - Broadcast receivers that fall behind lose old events, never block emit

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

use crate::subscription::kinds::SubscriptionKind;

/// Something an observer may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connecting { node: String },
    Connected { node: String },
    Disconnected { node: Option<String>, reason: String },
    NodeSwitched { from: Option<String>, to: String },
    NodeRecovered { node: String },
    NodeUnavailable { node: String, consecutive_failures: u32 },
    SubscriptionRestored { kind: SubscriptionKind, subscription_id: String },
    Error { message: String },
}

/// Observer callback.
pub type EventObserver = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

const BROADCAST_CAPACITY: usize = 256;

/// Multicasts events to observers.
#[derive(Clone)]
pub struct EventSink {
    inner: Arc<EventSinkInner>,
}

struct EventSinkInner {
    observers: RwLock<Vec<EventObserver>>,
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(EventSinkInner {
                observers: RwLock::new(Vec::new()),
                tx,
            }),
        }
    }

    /// Register a callback invoked for every subsequent event.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Receive events as a stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.tx.subscribe()
    }

    /// Deliver an event to every observer.
    pub fn emit(&self, event: ConnectionEvent) {
        tracing::debug!(event = ?event, "Connection event");

        let observers: Vec<EventObserver> = self
            .inner
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (i, observer) in observers.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| observer(&event))).is_err() {
                tracing::warn!(observer = i, "Event observer panicked");
            }
        }

        // No receivers is fine.
        let _ = self.inner.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink")
            .field(
                "observers",
                &self.inner.observers.read().map(|o| o.len()).unwrap_or_default(),
            )
            .field("receivers", &self.inner.tx.receiver_count())
            .finish()
    }
}
