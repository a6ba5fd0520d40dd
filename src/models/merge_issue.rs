// ABOUTME: Obstacles found before a merge can proceed, and the choices offered for each

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A classified obstacle blocking a merge. Not an error: the caller decides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeIssue {
    NothingToMerge,
    MainDirty { files: Vec<String> },
    WorktreeDirty { files: Vec<String> },
    MergeConflict { files: Vec<PathBuf> },
}

/// Decision the caller can take for an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Drop the pane without merging
    ClosePane,
    /// Commit the pending changes (main line or worktree) and retry
    CommitChanges,
    /// Stash the main line's pending changes and retry
    StashMain,
    /// Hand the conflicting files to the pane's agent
    AgentResolve,
    /// The user fixes things inside the pane, then retries
    Manual,
    Cancel,
}

impl MergeIssue {
    /// Choices surfaced for this issue, preferred first
    pub fn resolutions(&self) -> &'static [Resolution] {
        match self {
            Self::NothingToMerge => &[Resolution::ClosePane, Resolution::Cancel],
            Self::MainDirty { .. } => &[
                Resolution::CommitChanges,
                Resolution::StashMain,
                Resolution::Cancel,
            ],
            Self::WorktreeDirty { .. } => &[Resolution::CommitChanges, Resolution::Cancel],
            Self::MergeConflict { .. } => &[
                Resolution::AgentResolve,
                Resolution::Manual,
                Resolution::Cancel,
            ],
        }
    }

    pub fn allows(&self, resolution: Resolution) -> bool {
        self.resolutions().contains(&resolution)
    }
}

impl fmt::Display for MergeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingToMerge => write!(f, "nothing to merge"),
            Self::MainDirty { files } => {
                write!(f, "main branch has uncommitted changes ({} files)", files.len())
            }
            Self::WorktreeDirty { files } => {
                write!(f, "worktree has uncommitted changes ({} files)", files.len())
            }
            Self::MergeConflict { files } => {
                let names: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
                write!(f, "merge conflict in: {}", names.join(", "))
            }
        }
    }
}
