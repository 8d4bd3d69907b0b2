//! Status bookkeeping for source implementations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::{SourceChange, SourceListener, SourceStatus, SubscriptionId};
use crate::error::LoadError;

/// Status, error and listener table for a [`Source`](super::Source).
///
/// Setters publish a notification only when the stored value actually
/// changes. Notifications are delivered after the internal lock is released,
/// so a listener may call back into the source (read status, unsubscribe)
/// without deadlocking. Listeners whose owner has been dropped are pruned
/// on the next delivery.
pub struct SourceState {
    key: String,
    current: RwLock<Current>,
    listeners: DashMap<SubscriptionId, Weak<dyn SourceListener>>,
    next_id: AtomicU64,
}

#[derive(Debug, Default)]
struct Current {
    status: SourceStatus,
    error: Option<LoadError>,
}

impl SourceState {
    /// Create state for the source identified by `key`, starting at `NotLoaded`.
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_status(key, SourceStatus::NotLoaded)
    }

    pub fn with_status(key: impl Into<String>, status: SourceStatus) -> Self {
        Self {
            key: key.into(),
            current: RwLock::new(Current {
                status,
                error: None,
            }),
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn status(&self) -> SourceStatus {
        self.current.read().status
    }

    pub fn error(&self) -> Option<LoadError> {
        self.current.read().error.clone()
    }

    /// Store a new status. Returns `true` if it differed from the old one.
    pub fn set_status(&self, status: SourceStatus) -> bool {
        {
            let mut current = self.current.write();
            if current.status == status {
                return false;
            }
            current.status = status;
        }
        self.notify(SourceChange::Status);
        true
    }

    /// Store a new error payload. Returns `true` if it differed from the old one.
    pub fn set_error(&self, error: Option<LoadError>) -> bool {
        {
            let mut current = self.current.write();
            if current.error == error {
                return false;
            }
            current.error = error;
        }
        self.notify(SourceChange::Error);
        true
    }

    /// Record `error`, then move to `Error`.
    ///
    /// The payload is stored first so listeners reacting to the status change
    /// already see it.
    pub fn fail(&self, error: LoadError) {
        tracing::debug!(source_key = %self.key, error = %error, "Source failed");
        self.set_error(Some(error));
        self.set_status(SourceStatus::Error);
    }

    /// Clear any error, then move to `Ready`.
    pub fn complete(&self) {
        self.set_error(None);
        self.set_status(SourceStatus::Ready);
    }

    /// Publish a change that is not covered by the status or error setters.
    pub fn notify_details(&self) {
        self.notify(SourceChange::Details);
    }

    pub fn subscribe(&self, listener: Weak<dyn SourceListener>) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.insert(id, listener);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Number of registered listeners, including ones not yet pruned.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn notify(&self, change: SourceChange) {
        // Collect first so no shard lock is held while listeners run.
        let mut live: Vec<Arc<dyn SourceListener>> = Vec::with_capacity(self.listeners.len());
        let mut dead = Vec::new();
        for entry in self.listeners.iter() {
            match entry.value().upgrade() {
                Some(listener) => live.push(listener),
                None => dead.push(*entry.key()),
            }
        }
        for id in dead {
            self.listeners.remove(&id);
        }
        for listener in live {
            listener.on_source_changed(&self.key, change);
        }
    }
}

impl fmt::Debug for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.read();
        f.debug_struct("SourceState")
            .field("key", &self.key)
            .field("status", &current.status)
            .field("error", &current.error)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
