// ABOUTME: Core data models for panes, their workspaces, attention state and merge issues

pub mod merge_issue;
pub mod session;

pub use merge_issue::{MergeIssue, Resolution};
pub use session::{
    AttentionState, BackgroundTask, OptionChoice, PaneId, PotentialHarm, RequestId, Session,
    SignalCache, SignalVerdict, TaskStatus, WaitingPrompt, WorkspaceBinding,
};
