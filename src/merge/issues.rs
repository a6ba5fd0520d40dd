// ABOUTME: One handler per merge issue, applying the resolution the caller picked

use super::{MergeError, MergeOrchestrator, MergeOutcome};
use crate::models::{MergeIssue, PaneId, Resolution, Session};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum IssueOutcome {
    /// The merge was re-attempted after the fix
    Retried(MergeOutcome),
    Closed { session: Session, branch_deleted: bool },
    /// Nothing done; the user has to act inside the pane, then merge again
    AwaitingUser(String),
    Cancelled,
}

fn conflict_prompt(main: &str, files: &[PathBuf]) -> String {
    let list: Vec<String> = files.iter().map(|f| format!("- {}", f.display())).collect();
    format!(
        "Merging `{main}` into this branch conflicts in:\n{}\n\
         Run `git merge {main}`, resolve every conflict keeping the intent of both sides, \
         then commit the merge. Do not push.",
        list.join("\n")
    )
}

impl MergeOrchestrator {
    /// Apply `resolution` to `issue` for pane `id`
    pub async fn resolve_issue(
        &self,
        id: PaneId,
        issue: &MergeIssue,
        resolution: Resolution,
    ) -> Result<IssueOutcome, MergeError> {
        if !issue.allows(resolution) {
            return Err(MergeError::Unsupported {
                issue: issue.clone(),
                resolution,
            });
        }
        if resolution == Resolution::Cancel {
            return Ok(IssueOutcome::Cancelled);
        }

        match issue {
            MergeIssue::NothingToMerge => self.handle_nothing_to_merge(id).await,
            MergeIssue::MainDirty { .. } => self.handle_main_dirty(id, resolution).await,
            MergeIssue::WorktreeDirty { .. } => self.handle_worktree_dirty(id).await,
            MergeIssue::MergeConflict { files } => {
                self.handle_conflict(id, files, resolution).await
            }
        }
    }

    async fn handle_nothing_to_merge(&self, id: PaneId) -> Result<IssueOutcome, MergeError> {
        let (session, branch_deleted) = self.close(id).await?;
        Ok(IssueOutcome::Closed {
            session,
            branch_deleted,
        })
    }

    async fn handle_main_dirty(
        &self,
        id: PaneId,
        resolution: Resolution,
    ) -> Result<IssueOutcome, MergeError> {
        let session = self.registry.get(id).ok_or(MergeError::PaneNotFound(id))?;
        let Some(workspace) = &session.workspace else {
            return Ok(IssueOutcome::Retried(MergeOutcome::Issue(MergeIssue::NothingToMerge)));
        };
        let root = &workspace.project_root;

        if resolution == Resolution::StashMain {
            self.git
                .stash(root, &format!("panekeeper: before merging {}", workspace.branch))
                .await?;
            info!("Stashed main-line changes in {}", root.display());
        } else {
            let message = self.commit_all(session.agent, root).await?;
            info!("Committed main-line changes: {}", message);
        }
        Ok(IssueOutcome::Retried(self.merge(id).await?))
    }

    async fn handle_worktree_dirty(&self, id: PaneId) -> Result<IssueOutcome, MergeError> {
        let session = self.registry.get(id).ok_or(MergeError::PaneNotFound(id))?;
        if let Some(workspace) = &session.workspace {
            // An agent-written message already failed once; the fallback keeps this deterministic
            self.git.stage_all(&workspace.path).await?;
            self.git.commit(&workspace.path, &self.fallback_message).await?;
        }
        Ok(IssueOutcome::Retried(self.merge(id).await?))
    }

    async fn handle_conflict(
        &self,
        id: PaneId,
        files: &[PathBuf],
        resolution: Resolution,
    ) -> Result<IssueOutcome, MergeError> {
        let session = self.registry.get(id).ok_or(MergeError::PaneNotFound(id))?;
        let Some(workspace) = &session.workspace else {
            return Ok(IssueOutcome::Retried(MergeOutcome::Issue(MergeIssue::NothingToMerge)));
        };
        let main = self.git.current_branch(&workspace.project_root).await?;

        if resolution == Resolution::Manual {
            return Ok(IssueOutcome::AwaitingUser(format!(
                "In pane {}, run `git merge {}` in {}, resolve the conflicts, commit, then merge again.",
                session.slug,
                main,
                workspace.path.display()
            )));
        }

        let Some(agent) = session.agent else {
            return Ok(IssueOutcome::AwaitingUser(
                "This pane has no agent; resolve the conflicts manually, then merge again.".into(),
            ));
        };

        info!("Handing {} conflicting files to {}", files.len(), agent);
        if let Err(e) = self
            .agents
            .run_once(agent, &conflict_prompt(&main, files), &workspace.path)
            .await
        {
            warn!("{} could not resolve conflicts: {}", agent, e);
            self.abort_if_conflicted(&workspace.path).await?;
            return Ok(IssueOutcome::AwaitingUser(format!(
                "{} could not resolve the conflicts ({}); resolve them manually, then merge again.",
                agent, e
            )));
        }

        // Anything the agent left half-merged is rolled back before re-checking
        self.abort_if_conflicted(&workspace.path).await?;
        Ok(IssueOutcome::Retried(self.merge(id).await?))
    }

    async fn abort_if_conflicted(&self, worktree: &Path) -> Result<(), MergeError> {
        if !self.git.conflicted_files(worktree).await?.is_empty() {
            self.git.abort_merge(worktree).await?;
        }
        Ok(())
    }
}
