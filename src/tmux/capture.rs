// ABOUTME: Bounded tail capture of a tmux pane with retry when the tail is mostly blank rows
//
// Right after a clear or a prompt redraw tmux reports a run of empty rows at
// the bottom of the pane, which would starve callers of real content. The
// reader widens the window by the blank count plus a buffer, a bounded number
// of times, and if nothing but blanks ever came back it looks once through a
// large fixed window before giving up. A dead pane yields empty content.

use super::Multiplexer;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

lazy_static! {
    /// Matches CSI escape sequences (colors, cursor movement)
    static ref ANSI_REGEX: Regex = Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap();
}

/// Strip ANSI escape sequences from text
pub fn strip_ansi_codes(text: &str) -> String {
    ANSI_REGEX.replace_all(text, "").to_string()
}

/// Retry knobs for [`SnapshotReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePolicy {
    pub max_retries: usize,
    pub retry_buffer: usize,
    pub ceiling_lines: usize,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_buffer: 10,
            ceiling_lines: 1000,
        }
    }
}

#[derive(Clone)]
pub struct SnapshotReader {
    mux: Arc<dyn Multiplexer>,
    policy: CapturePolicy,
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader")
            .field("policy", &self.policy)
            .finish()
    }
}

/// Lines of one capture with the trailing blank run cut off
struct Tail {
    content: Vec<String>,
    trailing_blank: usize,
}

fn split_trailing_blank(raw: &str) -> Tail {
    let mut content: Vec<String> = strip_ansi_codes(raw)
        .lines()
        .map(|l| l.trim_end().to_string())
        .collect();
    let before = content.len();
    while content.last().is_some_and(|l| l.is_empty()) {
        content.pop();
    }
    Tail {
        trailing_blank: before - content.len(),
        content,
    }
}

fn last_lines(content: &[String], n: usize) -> String {
    let start = content.len().saturating_sub(n);
    content[start..].join("\n")
}

impl SnapshotReader {
    pub fn new(mux: Arc<dyn Multiplexer>, policy: CapturePolicy) -> Self {
        Self { mux, policy }
    }

    pub fn multiplexer(&self) -> &Arc<dyn Multiplexer> {
        &self.mux
    }

    async fn capture_once(&self, handle: &str, window: usize) -> Option<Tail> {
        match self.mux.capture_tail(handle, window).await {
            Ok(raw) => Some(split_trailing_blank(&raw)),
            Err(e) => {
                debug!("Capture of pane {} failed: {}", handle, e);
                None
            }
        }
    }

    /// Up to `desired_lines` of real content from the bottom of the pane.
    /// Empty when the pane is gone or shows nothing.
    pub async fn capture(&self, handle: &str, desired_lines: usize) -> String {
        let desired_lines = desired_lines.max(1);
        let mut window = desired_lines;
        let mut best: Vec<String> = Vec::new();

        for attempt in 0..=self.policy.max_retries {
            let Some(tail) = self.capture_once(handle, window).await else {
                return String::new();
            };

            if tail.content.len() >= desired_lines {
                return last_lines(&tail.content, desired_lines);
            }
            if !tail.content.is_empty() {
                best = tail.content;
            }
            if attempt == self.policy.max_retries {
                break;
            }
            window += tail.trailing_blank + self.policy.retry_buffer;
            debug!(
                "Pane {} tail short on content, retrying with window {}",
                handle, window
            );
        }

        if !best.is_empty() {
            return last_lines(&best, desired_lines);
        }

        if window < self.policy.ceiling_lines {
            debug!(
                "Pane {} blank after retries, widening to {}",
                handle, self.policy.ceiling_lines
            );
            if let Some(tail) = self.capture_once(handle, self.policy.ceiling_lines).await {
                return last_lines(&tail.content, desired_lines);
            }
        }

        String::new()
    }
}
