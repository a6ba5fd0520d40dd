// ABOUTME: Git operations used by the merge workflow: status, commit, merge with conflict detection, stash

use super::cli::{GitCli, GitError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Paths owned by panekeeper itself; never counted as user changes
const OWN_DIR_PREFIX: &str = ".panekeeper/";

/// Result of a `git merge` that is allowed to conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAttempt {
    Clean,
    Conflicted(Vec<PathBuf>),
    /// Refused for another reason (e.g. local changes would be overwritten)
    Failed(String),
}

fn porcelain_path(line: &str) -> Option<&str> {
    let path = line.get(3..)?.trim();
    // Renames are reported as "old -> new"
    let path = path.rsplit(" -> ").next().unwrap_or(path);
    let path = path.trim_matches('"');
    (!path.is_empty()).then_some(path)
}

impl GitCli {
    /// Paths with uncommitted changes (tracked or untracked), excluding our own directory
    pub async fn dirty_files(&self, cwd: &Path) -> Result<Vec<String>, GitError> {
        let out = self
            .run_checked(cwd, &["status", "--porcelain", "--untracked-files=all"])
            .await?;
        Ok(out
            .lines()
            .filter_map(porcelain_path)
            .filter(|p| !p.starts_with(OWN_DIR_PREFIX))
            .map(str::to_string)
            .collect())
    }

    pub async fn stage_all(&self, cwd: &Path) -> Result<(), GitError> {
        self.run_checked(cwd, &["add", "-A", "--", ".", ":!.panekeeper"])
            .await
            .map(|_| ())
    }

    /// Commit staged changes; --no-gpg-sign keeps a passphrase prompt from hanging us
    pub async fn commit(&self, cwd: &Path, message: &str) -> Result<(), GitError> {
        self.run_checked(cwd, &["commit", "--no-gpg-sign", "-m", message])
            .await
            .map(|_| ())
    }

    pub async fn current_branch(&self, cwd: &Path) -> Result<String, GitError> {
        let out = self
            .run_checked(cwd, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(out.trim().to_string())
    }

    pub async fn head_commit(&self, cwd: &Path) -> Result<String, GitError> {
        let out = self.run_checked(cwd, &["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Commits on `branch` that `base` does not have
    pub async fn commits_ahead(&self, cwd: &Path, base: &str, branch: &str) -> Result<usize, GitError> {
        let range = format!("{}..{}", base, branch);
        let out = self
            .run_checked(cwd, &["rev-list", "--count", &range])
            .await?;
        Ok(out.trim().parse().unwrap_or(0))
    }

    pub async fn conflicted_files(&self, cwd: &Path) -> Result<Vec<PathBuf>, GitError> {
        let out = self
            .run_checked(cwd, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }

    /// Merge `rev` into the branch checked out in `cwd`. On conflict the
    /// conflicted paths are collected and the merge is aborted, leaving the
    /// working tree as it was before the attempt.
    pub async fn merge_or_abort(&self, cwd: &Path, rev: &str) -> Result<MergeAttempt, GitError> {
        let output = self
            .run(cwd, &["merge", "--no-edit", "--no-gpg-sign", rev])
            .await?;
        if output.success {
            return Ok(MergeAttempt::Clean);
        }

        let conflicts = self.conflicted_files(cwd).await?;
        if conflicts.is_empty() {
            debug!("git merge {} refused: {}", rev, output.stderr);
            let reason = if output.stderr.is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr
            };
            return Ok(MergeAttempt::Failed(reason));
        }

        self.abort_merge(cwd).await?;
        Ok(MergeAttempt::Conflicted(conflicts))
    }

    pub async fn abort_merge(&self, cwd: &Path) -> Result<(), GitError> {
        let output = self.run(cwd, &["merge", "--abort"]).await?;
        if !output.success {
            warn!("git merge --abort failed in {}: {}", cwd.display(), output.stderr);
            // Last resort so the tree is not left half-merged
            self.run_checked(cwd, &["reset", "--merge"]).await?;
        }
        Ok(())
    }

    pub async fn stash(&self, cwd: &Path, message: &str) -> Result<(), GitError> {
        self.run_checked(cwd, &["stash", "push", "--include-untracked", "-m", message])
            .await
            .map(|_| ())
    }

    pub async fn local_branches(&self, cwd: &Path) -> Result<Vec<String>, GitError> {
        let out = self
            .run_checked(cwd, &["branch", "--format=%(refname:short)"])
            .await?;
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    /// Safe delete: git refuses if the branch is not fully merged
    pub async fn delete_branch(&self, cwd: &Path, branch: &str) -> Result<(), GitError> {
        self.run_checked(cwd, &["branch", "-d", branch])
            .await
            .map(|_| ())
    }
}
