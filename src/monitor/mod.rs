// ABOUTME: Per-pane polling tasks that diff successive captures and feed the status classifier
//
// Each pane gets its own task and its own cancellation token, so a capture
// that hangs on one pane never delays another. Disconnected panes are skipped
// without capturing; after enough disconnected ticks the task gives up and the
// reconcile loop restarts it if the pane comes back.

mod input;

pub use input::InputTracker;

use crate::models::PaneId;
use crate::registry::PaneRegistry;
use crate::status::{Observation, RawActivity, StatusClassifier};
use crate::tmux::SnapshotReader;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Remembers the previous capture of one pane
#[derive(Debug, Default)]
pub struct ActivityTracker {
    previous: Option<String>,
}

impl ActivityTracker {
    /// Busy when the screen changed since the last capture, static when not.
    /// The first capture only primes the tracker.
    pub fn observe(&mut self, content: &str) -> Option<RawActivity> {
        let activity = match self.previous.as_deref() {
            None => None,
            Some(previous) if previous == content => Some(RawActivity::Static),
            Some(_) => Some(RawActivity::Busy),
        };
        if activity != Some(RawActivity::Static) {
            self.previous = Some(content.to_string());
        }
        activity
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub capture_lines: usize,
    pub disconnected_ticks_before_stop: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            capture_lines: 50,
            disconnected_ticks_before_stop: 300,
        }
    }
}

#[derive(Clone)]
struct MonitorContext {
    registry: Arc<PaneRegistry>,
    reader: SnapshotReader,
    classifier: StatusClassifier,
    input: Arc<InputTracker>,
    settings: MonitorSettings,
}

struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one polling task per pane
pub struct MonitorSupervisor {
    ctx: MonitorContext,
    root: CancellationToken,
    tasks: Mutex<HashMap<PaneId, MonitorHandle>>,
}

impl MonitorSupervisor {
    pub fn new(
        registry: Arc<PaneRegistry>,
        reader: SnapshotReader,
        classifier: StatusClassifier,
        input: Arc<InputTracker>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            ctx: MonitorContext {
                registry,
                reader,
                classifier,
                input,
                settings,
            },
            root: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<PaneId, MonitorHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start polling `id`. No-op while a task for it is still running.
    pub fn start(&self, id: PaneId) {
        let mut tasks = self.tasks();
        if tasks.get(&id).is_some_and(|h| !h.task.is_finished()) {
            return;
        }
        let cancel = self.root.child_token();
        let task = tokio::spawn(poll_pane(self.ctx.clone(), id, cancel.clone()));
        tasks.insert(id, MonitorHandle { cancel, task });
        debug!("Started monitor for pane {}", id.short());
    }

    /// Stop polling `id` and drop any pending classification for it
    pub fn stop(&self, id: PaneId) {
        if let Some(handle) = self.tasks().remove(&id) {
            handle.cancel.cancel();
            debug!("Stopped monitor for pane {}", id.short());
        }
        self.ctx.classifier.invalidate(id);
        self.ctx.input.forget(id);
    }

    pub fn stop_all(&self) {
        self.root.cancel();
        self.tasks().clear();
    }

    pub fn is_running(&self, id: PaneId) -> bool {
        self.tasks()
            .get(&id)
            .is_some_and(|h| !h.task.is_finished())
    }

    pub fn running(&self) -> Vec<PaneId> {
        self.tasks()
            .iter()
            .filter(|(_, h)| !h.task.is_finished())
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Drop for MonitorSupervisor {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn poll_pane(ctx: MonitorContext, id: PaneId, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(ctx.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tracker = ActivityTracker::default();
    let mut disconnected_ticks = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(session) = ctx.registry.get(id) else {
            debug!("Pane {} gone, monitor exiting", id.short());
            break;
        };

        if !session.pane_connected {
            disconnected_ticks += 1;
            if disconnected_ticks >= ctx.settings.disconnected_ticks_before_stop {
                info!(
                    "Pane {} unresolvable for {} ticks, monitor stopping",
                    id.short(),
                    disconnected_ticks
                );
                break;
            }
            continue;
        }
        disconnected_ticks = 0;

        let content = tokio::select! {
            _ = cancel.cancelled() => break,
            content = ctx.reader.capture(&session.pane_handle, ctx.settings.capture_lines) => content,
        };
        if content.is_empty() {
            continue;
        }

        let Some(activity) = tracker.observe(&content) else {
            continue;
        };
        ctx.classifier.observe(
            id,
            Observation {
                content: &content,
                activity,
                user_typing: ctx.input.is_typing(id),
            },
        );
    }
}
