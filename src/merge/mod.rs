// ABOUTME: Two-phase merge of a pane's worktree branch back into the main line, then teardown
//
// Phase 1 merges the main line into the worktree branch so any conflict is
// met inside the worktree, and is aborted there. Phase 2 merges the branch
// into the main line and should be conflict-free; a conflict there is fatal.
// Once phase 2 starts the rest runs on its own task and cannot be cancelled
// by dropping the caller's future.

pub mod issues;

pub use issues::IssueOutcome;

use crate::agents::{clean_commit_message, AgentKind, AgentRunner};
use crate::git::{GitCli, GitError, MergeAttempt, WorktreeError, WorktreeManager};
use crate::models::{MergeIssue, PaneId, Session, WorkspaceBinding};
use crate::registry::PaneRegistry;
use crate::store::{Persister, StoreError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Pane {0} not found")]
    PaneNotFound(PaneId),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("Phase 1 (main into worktree) failed: {stderr}")]
    Phase1Failed { stderr: String },
    #[error("Phase 2 (worktree into main) conflicted in: {}", display_paths(.files))]
    Phase2Conflict { files: Vec<PathBuf> },
    #[error("Phase 2 (worktree into main) failed: {stderr}")]
    Phase2Failed { stderr: String },
    #[error("Cleanup after merge failed: {0}")]
    Cleanup(#[from] WorktreeError),
    #[error("Failed to persist panes: {0}")]
    Store(#[from] StoreError),
    #[error("{resolution:?} does not apply to: {issue}")]
    Unsupported {
        issue: MergeIssue,
        resolution: crate::models::Resolution,
    },
}

fn display_paths(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Branch merged; the pane is out of the registry
    Merged { session: Session, into: String },
    Issue(MergeIssue),
}

/// Per-pane result of a batch merge
#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
    Merged(Box<Session>),
    Issue(MergeIssue),
    Failed(String),
    /// Not attempted because a nested workspace under it did not merge
    Skipped { blocked_by: PaneId },
}

#[derive(Clone)]
pub struct MergeOrchestrator {
    registry: Arc<PaneRegistry>,
    git: GitCli,
    worktrees: Arc<WorktreeManager>,
    agents: Arc<dyn AgentRunner>,
    persister: Persister,
    fallback_message: String,
}

const COMMIT_PROMPT: &str = "Write a single-line conventional commit message for the \
uncommitted changes in this repository. Reply with the message only.";

/// Panes with a workspace, deepest workspace first (stable for equal depth)
pub fn merge_order(sessions: &[Session]) -> Vec<PaneId> {
    let mut with_workspace: Vec<(usize, PaneId)> = sessions
        .iter()
        .filter_map(|s| s.workspace.as_ref().map(|w| (w.depth(), s.id)))
        .collect();
    with_workspace.sort_by(|a, b| b.0.cmp(&a.0));
    with_workspace.into_iter().map(|(_, id)| id).collect()
}

impl MergeOrchestrator {
    pub fn new(
        registry: Arc<PaneRegistry>,
        git: GitCli,
        worktrees: Arc<WorktreeManager>,
        agents: Arc<dyn AgentRunner>,
        persister: Persister,
        fallback_message: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            git,
            worktrees,
            agents,
            persister,
            fallback_message: fallback_message.into(),
        }
    }

    /// Run the full protocol for one pane. Safe to call again after a
    /// conflict has been resolved by hand.
    pub async fn merge(&self, id: PaneId) -> Result<MergeOutcome, MergeError> {
        let session = self.registry.get(id).ok_or(MergeError::PaneNotFound(id))?;
        let Some(workspace) = session.workspace.clone() else {
            return Ok(MergeOutcome::Issue(MergeIssue::NothingToMerge));
        };
        info!("Merging pane {} ({})", session.slug, id.short());

        if let Some(issue) = self.commit_worktree(&session, &workspace).await? {
            return Ok(MergeOutcome::Issue(issue));
        }

        let main_dirty = self.git.dirty_files(&workspace.project_root).await?;
        if !main_dirty.is_empty() {
            return Ok(MergeOutcome::Issue(MergeIssue::MainDirty { files: main_dirty }));
        }

        let main = self.git.current_branch(&workspace.project_root).await?;
        let ahead = self
            .git
            .commits_ahead(&workspace.project_root, &main, &workspace.branch)
            .await?;
        if ahead == 0 {
            return Ok(MergeOutcome::Issue(MergeIssue::NothingToMerge));
        }

        debug!("Phase 1: merging {} into {}", main, workspace.branch);
        match self.git.merge_or_abort(&workspace.path, &main).await? {
            MergeAttempt::Clean => {}
            MergeAttempt::Conflicted(files) => {
                info!(
                    "Pane {} conflicts with {} in {} files",
                    session.slug,
                    main,
                    files.len()
                );
                return Ok(MergeOutcome::Issue(MergeIssue::MergeConflict { files }));
            }
            MergeAttempt::Failed(stderr) => return Err(MergeError::Phase1Failed { stderr }),
        }

        let this = self.clone();
        tokio::spawn(async move { this.finish(id, workspace, main).await })
            .await
            .map_err(|e| MergeError::Phase2Failed {
                stderr: e.to_string(),
            })?
    }

    /// Phase 2 and cleanup
    async fn finish(
        &self,
        id: PaneId,
        workspace: WorkspaceBinding,
        main: String,
    ) -> Result<MergeOutcome, MergeError> {
        debug!("Phase 2: merging {} into {}", workspace.branch, main);
        match self
            .git
            .merge_or_abort(&workspace.project_root, &workspace.branch)
            .await?
        {
            MergeAttempt::Clean => {}
            MergeAttempt::Conflicted(files) => return Err(MergeError::Phase2Conflict { files }),
            MergeAttempt::Failed(stderr) => return Err(MergeError::Phase2Failed { stderr }),
        }

        self.worktrees.remove(&workspace).await?;
        self.git
            .delete_branch(&workspace.project_root, &workspace.branch)
            .await
            .map_err(WorktreeError::from)?;

        let session = self.registry.remove(id).ok_or(MergeError::PaneNotFound(id))?;
        self.persister.persist().await?;
        info!("Merged {} into {} and removed pane", workspace.branch, main);
        Ok(MergeOutcome::Merged {
            session,
            into: main,
        })
    }

    /// Close without merging: drop the worktree and the pane. The branch is
    /// only deleted if git considers it merged. Returns whether it was deleted.
    pub async fn close(&self, id: PaneId) -> Result<(Session, bool), MergeError> {
        let session = self.registry.get(id).ok_or(MergeError::PaneNotFound(id))?;
        let mut branch_deleted = false;

        if let Some(workspace) = &session.workspace {
            if workspace.path.exists() {
                self.worktrees.remove(workspace).await?;
            }
            match self
                .git
                .delete_branch(&workspace.project_root, &workspace.branch)
                .await
            {
                Ok(()) => branch_deleted = true,
                Err(e) => warn!("Keeping branch {}: {}", workspace.branch, e),
            }
        }

        let session = self.registry.remove(id).ok_or(MergeError::PaneNotFound(id))?;
        self.persister.persist().await?;
        info!("Closed pane {} ({})", session.slug, id.short());
        Ok((session, branch_deleted))
    }

    /// Merge several panes deepest-first. A pane whose nested workspace did
    /// not merge is skipped rather than merged over stale nested state.
    pub async fn merge_many(&self, ids: &[PaneId]) -> Vec<(PaneId, BatchResult)> {
        let selected: Vec<Session> = self
            .registry
            .list()
            .into_iter()
            .filter(|s| ids.contains(&s.id))
            .collect();
        let mut failed: Vec<(PaneId, PathBuf)> = Vec::new();
        let mut results = Vec::new();

        for id in merge_order(&selected) {
            let Some(path) = selected
                .iter()
                .find(|s| s.id == id)
                .and_then(|s| s.workspace.as_ref())
                .map(|w| w.path.clone())
            else {
                continue;
            };

            let blocker = failed
                .iter()
                .find(|(_, child)| child.starts_with(&path))
                .map(|(blocker, _)| *blocker);
            if let Some(blocker) = blocker {
                info!("Skipping {} until {} merges", id.short(), blocker.short());
                results.push((id, BatchResult::Skipped { blocked_by: blocker }));
                failed.push((id, path));
                continue;
            }

            let result = match self.merge(id).await {
                Ok(MergeOutcome::Merged { session, .. }) => BatchResult::Merged(Box::new(session)),
                Ok(MergeOutcome::Issue(issue)) => BatchResult::Issue(issue),
                Err(e) => BatchResult::Failed(e.to_string()),
            };
            if !matches!(result, BatchResult::Merged(_)) {
                failed.push((id, path));
            }
            results.push((id, result));
        }

        // Plain terminal panes never enter the merge workflow
        for session in selected.iter().filter(|s| !s.has_workspace()) {
            results.push((session.id, BatchResult::Issue(MergeIssue::NothingToMerge)));
        }
        results
    }

    /// Stage and commit pending worktree changes. A merge left with
    /// unresolved paths is reported as a conflict and nothing is staged, so
    /// conflict markers are never committed. Otherwise an issue is returned
    /// only when the commit itself is refused (e.g. by a hook).
    async fn commit_worktree(
        &self,
        session: &Session,
        workspace: &WorkspaceBinding,
    ) -> Result<Option<MergeIssue>, MergeError> {
        let unresolved = self.git.conflicted_files(&workspace.path).await?;
        if !unresolved.is_empty() {
            info!(
                "Pane {} still has {} unresolved files, not committing",
                session.slug,
                unresolved.len()
            );
            return Ok(Some(MergeIssue::MergeConflict { files: unresolved }));
        }

        let dirty = self.git.dirty_files(&workspace.path).await?;
        if dirty.is_empty() {
            return Ok(None);
        }

        match self.commit_all(session.agent, &workspace.path).await {
            Ok(message) => {
                info!("Committed {} pending files: {}", dirty.len(), message);
                Ok(None)
            }
            Err(e) => {
                warn!("Auto-commit in {} failed: {}", workspace.path.display(), e);
                Ok(Some(MergeIssue::WorktreeDirty { files: dirty }))
            }
        }
    }

    /// Stage everything in `cwd` and commit with a generated message
    async fn commit_all(&self, agent: Option<AgentKind>, cwd: &Path) -> Result<String, GitError> {
        self.git.stage_all(cwd).await?;
        let message = self.commit_message(agent, cwd).await;
        self.git.commit(cwd, &message).await?;
        Ok(message)
    }

    async fn commit_message(&self, agent: Option<AgentKind>, cwd: &Path) -> String {
        let Some(agent) = agent else {
            return self.fallback_message.clone();
        };
        match self.agents.run_once(agent, COMMIT_PROMPT, cwd).await {
            Ok(raw) => clean_commit_message(&raw).unwrap_or_else(|| self.fallback_message.clone()),
            Err(e) => {
                debug!("{} could not write a commit message: {}", agent, e);
                self.fallback_message.clone()
            }
        }
    }
}
