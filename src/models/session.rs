// ABOUTME: Session data model representing one agent pane bound to a tmux pane and, usually, a git worktree

use crate::agents::AgentKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Stable logical identity of a pane. Assigned once, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaneId(Uuid);

impl PaneId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Short prefix used in log lines and CLI output
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for PaneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PaneId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a single classification request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Whether a pane needs the user's attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionState {
    #[default]
    Idle,
    Working,
    Analyzing,
    Waiting,
}

impl AttentionState {
    pub fn indicator(&self) -> &'static str {
        match self {
            Self::Idle => "○",
            Self::Working => "●",
            Self::Analyzing => "◐",
            Self::Waiting => "!",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
            Self::Analyzing => "analyzing",
            Self::Waiting => "waiting",
        }
    }
}

impl fmt::Display for AttentionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the local, deterministic look at a static screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalVerdict {
    /// A busy marker is on screen; the agent is still working
    Working,
    /// Nothing conclusive locally; escalated (or about to be) to the analyzer
    Ambiguous,
}

/// Deterministic verdict remembered for one screen digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCache {
    pub digest: u64,
    pub verdict: SignalVerdict,
}

/// One selectable answer offered by a waiting agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChoice {
    /// Human label, e.g. "Yes, allow this edit"
    pub action: String,
    /// Keys that select it, in `tmux send-keys` notation
    pub keys: Vec<String>,
}

/// Risk flag attached to a waiting prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotentialHarm {
    pub has_risk: bool,
    pub description: Option<String>,
}

/// Details shown while a pane is `waiting`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WaitingPrompt {
    pub question: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionChoice>,
    pub potential_harm: Option<PotentialHarm>,
}

impl WaitingPrompt {
    pub fn is_risky(&self) -> bool {
        self.potential_harm.as_ref().is_some_and(|h| h.has_risk)
    }
}

/// Isolated worktree a pane works in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceBinding {
    pub path: PathBuf,
    pub project_root: PathBuf,
    pub branch: String,
}

impl WorkspaceBinding {
    /// Number of path components, used to merge nested workspaces deepest-first
    pub fn depth(&self) -> usize {
        self.path.components().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
    Passed,
    Failed,
    Stopped,
}

/// Lifecycle of an auxiliary background task (test run or dev server)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackgroundTask {
    #[serde(default)]
    pub status: TaskStatus,
    pub output: Option<String>,
    pub url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl BackgroundTask {
    pub fn set(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Some(Utc::now());
    }
}

/// A pane: one agent-or-terminal working unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: PaneId,
    pub slug: String,
    /// Project name used to disambiguate equal slugs across projects
    pub project_tag: Option<String>,
    /// Current tmux pane handle (e.g. `%3`); not part of identity
    pub pane_handle: String,
    /// False while the handle is stale and no title matched
    #[serde(default = "default_true")]
    pub pane_connected: bool,
    pub workspace: Option<WorkspaceBinding>,
    pub agent: Option<AgentKind>,
    #[serde(default)]
    pub autopilot: bool,
    pub prompt: Option<String>,

    #[serde(default)]
    pub attention: AttentionState,
    pub status_checked_at: Option<DateTime<Utc>>,
    pub analysis_request: Option<RequestId>,
    pub signal_cache: Option<SignalCache>,
    pub analyzer_error: Option<String>,
    pub waiting_prompt: Option<WaitingPrompt>,

    #[serde(default)]
    pub test_run: BackgroundTask,
    #[serde(default)]
    pub dev_server: BackgroundTask,

    pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Session {
    pub fn new(slug: impl Into<String>, pane_handle: impl Into<String>) -> Self {
        Self {
            id: PaneId::new(),
            slug: slug.into(),
            project_tag: None,
            pane_handle: pane_handle.into(),
            pane_connected: true,
            workspace: None,
            agent: None,
            autopilot: false,
            prompt: None,
            attention: AttentionState::Idle,
            status_checked_at: None,
            analysis_request: None,
            signal_cache: None,
            analyzer_error: None,
            waiting_prompt: None,
            test_run: BackgroundTask::default(),
            dev_server: BackgroundTask::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_workspace(mut self, workspace: WorkspaceBinding) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_agent(mut self, agent: AgentKind) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_project_tag(mut self, tag: impl Into<String>) -> Self {
        self.project_tag = Some(tag.into());
        self
    }

    /// Title written to the tmux pane under the current naming scheme
    pub fn pane_title(&self) -> String {
        match &self.project_tag {
            Some(tag) => format!("{}-{}", tag, self.slug),
            None => self.slug.clone(),
        }
    }

    /// Titles this pane may carry, current scheme first, then legacy
    pub fn candidate_titles(&self) -> Vec<String> {
        let current = self.pane_title();
        let mut titles = vec![current];
        if titles[0] != self.slug {
            titles.push(self.slug.clone());
        }
        titles
    }

    pub fn has_workspace(&self) -> bool {
        self.workspace.is_some()
    }

    /// Record a new attention state and stamp the check time
    pub fn set_attention(&mut self, state: AttentionState) {
        self.attention = state;
        self.status_checked_at = Some(Utc::now());
        if state != AttentionState::Waiting {
            self.waiting_prompt = None;
        }
    }
}
