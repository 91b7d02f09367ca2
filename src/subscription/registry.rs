//! Live subscription table.
//!
//! # Responsibilities
//! - Own every subscription for the lifetime of its handle
//! - Route notifications by current server subscription id
//! - Re-key entries when a resubscribe yields a new server id
//! - Produce resume params from each entry's delivered cursor
//!
//! # Design Decisions
//! - Entries are keyed by a client-side handle id that never changes;
//!   server ids are only a routing alias
//! - Delivery awaits channel capacity, so a full handle applies
//!   backpressure to the receive loop instead of dropping items
//! - The cursor advances only after an item has entered the handle's buffer

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::observability::metrics;
use crate::rpc::ResponseHook;
use crate::subscription::handle::Subscription;
use crate::subscription::kinds::{resume_params, Cursor, Notification, SubscriptionKind};

/// Outcome of delivering one notification to its handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Delivered,
    /// Payload did not decode as the handle's item type.
    Malformed,
    /// The handle is gone or cancelled.
    Closed,
}

type DispatchFn = Arc<dyn Fn(Value) -> BoxFuture<'static, DispatchStatus> + Send + Sync>;
type ResumeFn = Box<dyn Fn() -> Value + Send + Sync>;

/// One registered subscription.
pub struct SubscriptionEntry {
    id: Uuid,
    kind: SubscriptionKind,
    server_id: Mutex<Option<String>>,
    /// Set when the socket is lost; cleared by whoever restores the entry.
    needs_restore: AtomicBool,
    resume: ResumeFn,
    dispatch: DispatchFn,
    cancel: CancellationToken,
}

impl SubscriptionEntry {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    /// Server id on the current connection, if subscribed.
    pub fn server_id(&self) -> Option<String> {
        self.server_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Params that continue the stream after the last delivered item.
    pub fn resume_params(&self) -> Value {
        (self.resume)()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_server_id(&self, server_id: Option<String>) -> Option<String> {
        std::mem::replace(
            &mut *self.server_id.lock().unwrap_or_else(PoisonError::into_inner),
            server_id,
        )
    }
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("server_id", &self.server_id())
            .finish()
    }
}

/// Shared subscription table.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: DashMap<Uuid, Arc<SubscriptionEntry>>,
    routes: DashMap<String, Uuid>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry and its handle. The entry is not routable until
    /// [`bind`](Self::bind) gives it a server id.
    pub fn register<T: Notification>(
        &self,
        kind: SubscriptionKind,
        params: Value,
        buffer: usize,
        cancel: CancellationToken,
    ) -> (Arc<SubscriptionEntry>, Subscription<T>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel::<T>(buffer.max(1));
        let cursor: Arc<Mutex<Option<Cursor>>> = Arc::new(Mutex::new(None));

        let resume = {
            let cursor = cursor.clone();
            Box::new(move || {
                let at = *cursor.lock().unwrap_or_else(PoisonError::into_inner);
                resume_params(kind, &params, at)
            }) as ResumeFn
        };

        let dispatch = {
            let cancel = cancel.clone();
            Arc::new(move |value: Value| {
                let tx = tx.clone();
                let cursor = cursor.clone();
                let cancel = cancel.clone();
                Box::pin(async move {
                    let item = match T::decode(value) {
                        Ok(item) => item,
                        Err(e) => {
                            tracing::warn!(subscription = %id, kind = %kind, error = %e, "Undecodable notification");
                            return DispatchStatus::Malformed;
                        }
                    };
                    let position = item.cursor();

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => DispatchStatus::Closed,
                        sent = tx.send(item) => match sent {
                            Ok(()) => {
                                if let Some(position) = position {
                                    Cursor::advance(
                                        &mut cursor.lock().unwrap_or_else(PoisonError::into_inner),
                                        position,
                                    );
                                }
                                metrics::record_notification(kind.as_str());
                                DispatchStatus::Delivered
                            }
                            Err(_) => DispatchStatus::Closed,
                        },
                    }
                }) as BoxFuture<'static, DispatchStatus>
            }) as DispatchFn
        };

        let entry = Arc::new(SubscriptionEntry {
            id,
            kind,
            server_id: Mutex::new(None),
            needs_restore: AtomicBool::new(false),
            resume,
            dispatch,
            cancel: cancel.clone(),
        });
        self.inner.entries.insert(id, entry.clone());

        (entry, Subscription::new(id, kind, rx, cancel))
    }

    /// Route `server_id` to the entry, replacing any previous alias.
    /// Returns false if the entry no longer exists.
    pub fn bind(&self, id: Uuid, server_id: String) -> bool {
        let Some(entry) = self.get(id) else {
            return false;
        };
        if let Some(old) = entry.set_server_id(Some(server_id.clone())) {
            self.inner.routes.remove_if(&old, |_, owner| *owner == id);
        }
        self.inner.routes.insert(server_id, id);
        true
    }

    /// Hook that binds the server id returned by a `qubic_subscribe`
    /// response. Runs on the receive loop, so the route exists before the
    /// next frame is read.
    pub fn bind_on_result(&self, id: Uuid) -> ResponseHook {
        let registry = self.clone();
        Box::new(move |result: &Value| match result.as_str() {
            Some(server_id) => {
                registry.bind(id, server_id.to_string());
            }
            None => {
                tracing::warn!(subscription = %id, result = %result, "Subscribe result is not an id");
            }
        })
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<SubscriptionEntry>> {
        self.inner.entries.get(&id).map(|e| e.value().clone())
    }

    /// Deliver a payload to whichever entry owns `server_id`.
    /// `None` if no entry does.
    pub async fn dispatch(&self, server_id: &str, payload: Value) -> Option<DispatchStatus> {
        let entry = self
            .inner
            .routes
            .get(server_id)
            .and_then(|id| self.inner.entries.get(id.value()).map(|e| e.value().clone()))?;

        let status = (entry.dispatch)(payload).await;
        if status == DispatchStatus::Closed {
            tracing::debug!(subscription = %entry.id, "Handle closed; removing subscription");
            self.remove(entry.id);
        }
        Some(status)
    }

    /// Forget every server id; entries stay registered for resubscribe.
    pub fn mark_all_disconnected(&self) {
        self.inner.routes.clear();
        for entry in self.inner.entries.iter() {
            entry.set_server_id(None);
            entry.needs_restore.store(true, Ordering::SeqCst);
        }
    }

    /// Claim every entry that lost its server subscription with the last
    /// socket. Each entry is handed out once per disconnect, so entries
    /// created on the new socket are never subscribed twice.
    pub fn take_for_restore(&self) -> Vec<Arc<SubscriptionEntry>> {
        self.inner
            .entries
            .iter()
            .filter(|e| e.value().needs_restore.swap(false, Ordering::SeqCst))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Whether `id` is still registered.
    pub fn contains(&self, id: Uuid) -> bool {
        self.inner.entries.contains_key(&id)
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<SubscriptionEntry>> {
        let (_, entry) = self.inner.entries.remove(&id)?;
        if let Some(server_id) = entry.server_id() {
            self.inner.routes.remove_if(&server_id, |_, owner| *owner == id);
        }
        entry.cancel.cancel();
        Some(entry)
    }

    /// Cancel and drop every subscription.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.inner.entries.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.remove(*id).is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("entries", &self.inner.entries.len())
            .field("routes", &self.inner.routes.len())
            .finish()
    }
}
