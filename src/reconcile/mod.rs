// ABOUTME: Rebinds panes to live tmux handles after tmux respawns a pane under a new id
//
// A recorded handle that is still live is trusted as-is, whatever its title
// says now (users retitle panes). Only when the handle has disappeared do we
// search live titles, current naming scheme first, then legacy. Titles are not
// unique across unrelated sessions, so an ambiguous match never rebinds and a
// handle already owned by another live pane is never taken.

use crate::models::{PaneId, Session};
use crate::registry::PaneRegistry;
use crate::tmux::{Multiplexer, TmuxError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rebind {
    pub id: PaneId,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub rebound: Vec<Rebind>,
    /// Panes that just lost their handle with no title match
    pub disconnected: Vec<PaneId>,
    /// Panes whose recorded handle is live again
    pub reconnected: Vec<PaneId>,
    /// Panes skipped because more than one live pane carried their title
    pub ambiguous: Vec<PaneId>,
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        !(self.rebound.is_empty() && self.disconnected.is_empty() && self.reconnected.is_empty())
    }
}

enum TitleMatch {
    None,
    Unique(String),
    Ambiguous,
}

fn find_by_title(
    candidates: &[String],
    live: &HashSet<String>,
    titles: &HashMap<String, String>,
    claimed: &HashSet<String>,
) -> TitleMatch {
    for candidate in candidates {
        let mut hits: Vec<&String> = titles
            .iter()
            .filter(|(handle, title)| {
                *title == candidate && live.contains(*handle) && !claimed.contains(*handle)
            })
            .map(|(handle, _)| handle)
            .collect();
        match hits.len() {
            0 => continue,
            1 => return TitleMatch::Unique(hits.remove(0).clone()),
            _ => return TitleMatch::Ambiguous,
        }
    }
    TitleMatch::None
}

/// Repair stale handles in place. Only `pane_handle` and `pane_connected` are written.
pub fn rebind_in_place(
    sessions: &mut [Session],
    live: &HashSet<String>,
    titles: &HashMap<String, String>,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    let mut claimed: HashSet<String> = sessions
        .iter()
        .filter(|s| live.contains(&s.pane_handle))
        .map(|s| s.pane_handle.clone())
        .collect();

    for session in sessions.iter_mut() {
        if live.contains(&session.pane_handle) {
            if !session.pane_connected {
                session.pane_connected = true;
                outcome.reconnected.push(session.id);
            }
            continue;
        }

        match find_by_title(&session.candidate_titles(), live, titles, &claimed) {
            TitleMatch::Unique(handle) => {
                outcome.rebound.push(Rebind {
                    id: session.id,
                    from: session.pane_handle.clone(),
                    to: handle.clone(),
                });
                claimed.insert(handle.clone());
                session.pane_handle = handle;
                if !session.pane_connected {
                    session.pane_connected = true;
                    outcome.reconnected.push(session.id);
                }
                continue;
            }
            TitleMatch::Ambiguous => outcome.ambiguous.push(session.id),
            TitleMatch::None => {}
        }

        if session.pane_connected {
            session.pane_connected = false;
            outcome.disconnected.push(session.id);
        }
    }

    outcome
}

/// Pure form of [`rebind_in_place`]
pub fn rebind(
    sessions: &[Session],
    live: &HashSet<String>,
    titles: &HashMap<String, String>,
) -> (Vec<Session>, ReconcileOutcome) {
    let mut sessions = sessions.to_vec();
    let outcome = rebind_in_place(&mut sessions, live, titles);
    (sessions, outcome)
}

/// Runs reconciliation passes against the live tmux server
pub struct Reconciler {
    registry: Arc<PaneRegistry>,
    mux: Arc<dyn Multiplexer>,
}

impl Reconciler {
    pub fn new(registry: Arc<PaneRegistry>, mux: Arc<dyn Multiplexer>) -> Self {
        Self { registry, mux }
    }

    /// One pass. A failed pane listing leaves the registry untouched: a tmux
    /// hiccup must not mark every pane disconnected.
    pub async fn run_pass(&self) -> Result<ReconcileOutcome, TmuxError> {
        let panes = self.mux.list_panes().await?;
        let live: HashSet<String> = panes.iter().map(|p| p.handle.clone()).collect();
        let titles: HashMap<String, String> = panes
            .into_iter()
            .map(|p| (p.handle, p.title))
            .collect();

        let mut outcome = ReconcileOutcome::default();
        self.registry.modify_all(|sessions| {
            outcome = rebind_in_place(sessions, &live, &titles);
            outcome.changed()
        });

        for rebind in &outcome.rebound {
            info!(
                "Rebound pane {} from {} to {}",
                rebind.id.short(),
                rebind.from,
                rebind.to
            );
        }
        for id in &outcome.ambiguous {
            warn!("Pane {} has several live title matches, not rebinding", id.short());
        }
        for id in &outcome.disconnected {
            warn!("Pane {} lost its tmux pane", id.short());
        }
        debug!("Reconciled against {} live panes", live.len());
        Ok(outcome)
    }
}
