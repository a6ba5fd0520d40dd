// ABOUTME: In-memory fakes for the tmux and analyzer seams, shared by unit and behavioral tests
//
// Compiled into the library so the behavioral suite under tests/ can drive the
// engine without a tmux server or network access.

use crate::status::{AnalysisRequest, AnalysisVerdict, AnalyzerError, PaneAnalyzer};
use crate::tmux::{Multiplexer, PaneInfo, TmuxError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Default)]
pub struct FakePane {
    pub title: String,
    pub screen: String,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct MuxState {
    panes: BTreeMap<String, FakePane>,
    next_handle: u32,
    sent_keys: Vec<(String, Vec<String>)>,
    sent_text: Vec<(String, String)>,
    captures: usize,
    list_fails: bool,
}

/// Scriptable stand-in for a tmux server
#[derive(Debug, Default)]
pub struct FakeMultiplexer {
    state: Mutex<MuxState>,
}

fn missing(command: &str, handle: &str) -> TmuxError {
    TmuxError::CommandFailed {
        command: command.to_string(),
        stderr: format!("can't find pane: {handle}"),
    }
}

impl FakeMultiplexer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MuxState {
                next_handle: 100,
                ..MuxState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MuxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_pane(&self, handle: &str, title: &str, screen: &str) {
        self.state().panes.insert(
            handle.to_string(),
            FakePane {
                title: title.to_string(),
                screen: screen.to_string(),
                cwd: None,
            },
        );
    }

    pub fn set_screen(&self, handle: &str, screen: &str) {
        if let Some(pane) = self.state().panes.get_mut(handle) {
            pane.screen = screen.to_string();
        }
    }

    /// Kill `old` and bring the same pane back as `new`, title and screen intact
    pub fn respawn(&self, old: &str, new: &str) {
        let mut state = self.state();
        if let Some(pane) = state.panes.remove(old) {
            state.panes.insert(new.to_string(), pane);
        }
    }

    pub fn remove_pane(&self, handle: &str) {
        self.state().panes.remove(handle);
    }

    pub fn pane(&self, handle: &str) -> Option<FakePane> {
        self.state().panes.get(handle).cloned()
    }

    pub fn handles(&self) -> Vec<String> {
        self.state().panes.keys().cloned().collect()
    }

    pub fn sent_keys(&self) -> Vec<(String, Vec<String>)> {
        self.state().sent_keys.clone()
    }

    pub fn sent_text(&self) -> Vec<(String, String)> {
        self.state().sent_text.clone()
    }

    pub fn capture_count(&self) -> usize {
        self.state().captures
    }

    pub fn fail_listing(&self, fail: bool) {
        self.state().list_fails = fail;
    }
}

#[async_trait]
impl Multiplexer for FakeMultiplexer {
    async fn capture_tail(&self, handle: &str, lines: usize) -> Result<String, TmuxError> {
        let mut state = self.state();
        state.captures += 1;
        let pane = state
            .panes
            .get(handle)
            .ok_or_else(|| missing("capture-pane", handle))?;
        let rows: Vec<&str> = pane.screen.lines().collect();
        let start = rows.len().saturating_sub(lines);
        Ok(rows[start..].iter().map(|r| format!("{r}\n")).collect())
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
        let state = self.state();
        if state.list_fails {
            return Err(TmuxError::CommandFailed {
                command: "list-panes".into(),
                stderr: "no server running".into(),
            });
        }
        Ok(state
            .panes
            .iter()
            .map(|(handle, pane)| PaneInfo {
                handle: handle.clone(),
                title: pane.title.clone(),
            })
            .collect())
    }

    async fn send_keys(&self, handle: &str, keys: &[String]) -> Result<(), TmuxError> {
        let mut state = self.state();
        if !state.panes.contains_key(handle) {
            return Err(missing("send-keys", handle));
        }
        state.sent_keys.push((handle.to_string(), keys.to_vec()));
        Ok(())
    }

    async fn send_text(&self, handle: &str, text: &str) -> Result<(), TmuxError> {
        let mut state = self.state();
        if !state.panes.contains_key(handle) {
            return Err(missing("send-keys", handle));
        }
        state.sent_text.push((handle.to_string(), text.to_string()));
        Ok(())
    }

    async fn split_pane(&self, cwd: &Path) -> Result<String, TmuxError> {
        let mut state = self.state();
        let handle = format!("%{}", state.next_handle);
        state.next_handle += 1;
        state.panes.insert(
            handle.clone(),
            FakePane {
                cwd: Some(cwd.to_path_buf()),
                ..FakePane::default()
            },
        );
        Ok(handle)
    }

    async fn set_pane_title(&self, handle: &str, title: &str) -> Result<(), TmuxError> {
        let mut state = self.state();
        let pane = state
            .panes
            .get_mut(handle)
            .ok_or_else(|| missing("select-pane", handle))?;
        pane.title = title.to_string();
        Ok(())
    }

    async fn kill_pane(&self, handle: &str) -> Result<(), TmuxError> {
        self.state()
            .panes
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| missing("kill-pane", handle))
    }
}

/// Analyzer that answers from a queue (idle once the queue is empty).
/// A held analyzer blocks every call until [`FakeAnalyzer::release`].
#[derive(Debug, Default)]
pub struct FakeAnalyzer {
    calls: AtomicUsize,
    responses: Mutex<VecDeque<Result<AnalysisVerdict, AnalyzerError>>>,
    excerpts: Mutex<Vec<String>>,
    gate: Option<Semaphore>,
}

impl FakeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn with_response(self, response: Result<AnalysisVerdict, AnalyzerError>) -> Self {
        self.push(response);
        self
    }

    pub fn push(&self, response: Result<AnalysisVerdict, AnalyzerError>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    /// Let `n` held calls through
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn excerpts(&self) -> Vec<String> {
        self.excerpts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl PaneAnalyzer for FakeAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisVerdict, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.excerpts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.excerpt.clone());

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(AnalyzerError::Timeout),
            }
        }

        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Ok(AnalysisVerdict::idle()))
    }
}
