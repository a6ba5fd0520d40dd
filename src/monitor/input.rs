// ABOUTME: Records recent keystrokes per pane so the classifier can hold off while the user types

use crate::models::PaneId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct InputTracker {
    grace: Duration,
    last_input: Mutex<HashMap<PaneId, Instant>>,
}

impl InputTracker {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            last_input: Mutex::new(HashMap::new()),
        }
    }

    pub fn note(&self, id: PaneId) {
        self.last_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Instant::now());
    }

    /// True if input arrived within the grace window
    pub fn is_typing(&self, id: PaneId) -> bool {
        self.last_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|at| at.elapsed() < self.grace)
    }

    pub fn forget(&self, id: PaneId) {
        self.last_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}
