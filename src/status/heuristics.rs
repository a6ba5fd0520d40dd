// ABOUTME: Cheap local checks on a static screen before any model call is made

use crate::agents::AgentKind;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Busy markers only count near the bottom of the screen; scrollback often
/// still shows an old "esc to interrupt" line above a finished answer.
const MARKER_WINDOW: usize = 8;

/// Stable digest of a screen, keyed into the signal cache
pub fn screen_digest(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

pub fn shows_busy_marker(agent: Option<AgentKind>, content: &str) -> bool {
    let lines: Vec<&str> = content.lines().collect();
    let tail = &lines[lines.len().saturating_sub(MARKER_WINDOW)..];

    let agents: &[AgentKind] = match &agent {
        Some(agent) => std::slice::from_ref(agent),
        None => &AgentKind::ALL,
    };

    tail.iter().any(|line| {
        agents
            .iter()
            .flat_map(|a| a.busy_markers().iter())
            .any(|marker| line.contains(marker))
    })
}

/// Last `lines` lines of the screen, sent to the analyzer
pub fn excerpt(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
