// ABOUTME: Authoritative in-memory table of panes with change notifications for subscribers
//
// Every mutation runs under a single write lock and is visible to readers as a
// whole. Notifications go out over a broadcast channel so each subscriber
// drains its own receiver; a slow or panicking subscriber cannot affect the
// registry or the other subscribers. The registry never touches disk.

use crate::models::{PaneId, Session};
use std::panic::AssertUnwindSafe;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

const EVENT_CAPACITY: usize = 256;

/// What changed in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    Added(PaneId),
    Updated(PaneId),
    Removed(PaneId),
    /// Bulk change; subscribers should re-read the whole list
    Replaced,
}

#[derive(Debug)]
pub struct PaneRegistry {
    panes: RwLock<Vec<Session>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl Default for PaneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PaneRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            panes: RwLock::new(Vec::new()),
            events,
        }
    }

    pub fn from_sessions(sessions: Vec<Session>) -> Self {
        let registry = Self::new();
        *registry.write() = sessions;
        registry
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Session>> {
        self.panes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Session>> {
        self.panes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: RegistryEvent) {
        // No receivers is fine: nobody is listening yet
        let _ = self.events.send(event);
    }

    /// Current panes in display order
    pub fn list(&self) -> Vec<Session> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Look up a pane; stale ids are expected during churn, so absence is not an error
    pub fn get(&self, id: PaneId) -> Option<Session> {
        self.read().iter().find(|s| s.id == id).cloned()
    }

    pub fn contains(&self, id: PaneId) -> bool {
        self.read().iter().any(|s| s.id == id)
    }

    /// Append a pane. Returns false if the id is already present.
    pub fn insert(&self, session: Session) -> bool {
        let id = session.id;
        {
            let mut panes = self.write();
            if panes.iter().any(|s| s.id == id) {
                warn!("Refusing to insert duplicate pane id {}", id);
                return false;
            }
            panes.push(session);
        }
        self.notify(RegistryEvent::Added(id));
        true
    }

    pub fn remove(&self, id: PaneId) -> Option<Session> {
        let removed = {
            let mut panes = self.write();
            let index = panes.iter().position(|s| s.id == id)?;
            panes.remove(index)
        };
        self.notify(RegistryEvent::Removed(id));
        Some(removed)
    }

    /// Apply a patch to one pane. No-op (false) if the id is absent.
    pub fn update(&self, id: PaneId, patch: impl FnOnce(&mut Session)) -> bool {
        self.update_with(id, patch).is_some()
    }

    /// Apply a patch and return its result; the check and the write happen under one lock
    pub fn update_with<R>(&self, id: PaneId, patch: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let (result, changed) = {
            let mut panes = self.write();
            let session = panes.iter_mut().find(|s| s.id == id)?;
            let before = session.clone();
            let result = patch(session);
            // Identity is immutable
            session.id = before.id;
            (result, *session != before)
        };
        if changed {
            self.notify(RegistryEvent::Updated(id));
        }
        Some(result)
    }

    /// Overwrite the whole table with one notification
    pub fn replace_all(&self, sessions: Vec<Session>) {
        *self.write() = sessions;
        self.notify(RegistryEvent::Replaced);
    }

    /// Run a bulk edit under the write lock; notifies once if the closure reports a change
    pub fn modify_all(&self, edit: impl FnOnce(&mut Vec<Session>) -> bool) -> bool {
        let changed = edit(&mut self.write());
        if changed {
            self.notify(RegistryEvent::Replaced);
        }
        changed
    }

    /// Raw receiver for callers that drive their own loop
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Deliver events to `callback` on a dedicated task until the handle is dropped.
    /// Panics in the callback are caught and logged.
    pub fn subscribe_with<F>(&self, callback: F) -> Subscription
    where
        F: Fn(RegistryEvent) + Send + 'static,
    {
        let mut rx = self.events.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Registry subscriber lagged by {} events", skipped);
                        RegistryEvent::Replaced
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if std::panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    error!("Registry subscriber panicked handling {:?}", event);
                }
            }
        });
        Subscription { handle }
    }
}

/// Handle returned by [`PaneRegistry::subscribe_with`]; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
