// ABOUTME: Git worktree management for creating isolated working directories for panes

use super::cli::{GitCli, GitError};
use crate::models::WorkspaceBinding;
use git2::{BranchType, Repository};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WorktreeError {
    #[error("Git repository error: {0}")]
    Repo(#[from] git2::Error),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Worktree already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid branch name: {0}")]
    InvalidBranchName(String),
}

pub struct WorktreeManager {
    git: GitCli,
    /// Relative to the project root, e.g. `.panekeeper/worktrees`
    dir_name: PathBuf,
}

/// Kebab-case label from free text: lowercase ascii words, at most `max_words`
pub fn slugify(text: &str, max_words: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    cleaned
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join("-")
}

impl WorktreeManager {
    pub fn new(git: GitCli, dir_name: impl Into<PathBuf>) -> Self {
        Self {
            git,
            dir_name: dir_name.into(),
        }
    }

    pub fn worktree_path(&self, project_root: &Path, slug: &str) -> PathBuf {
        project_root.join(&self.dir_name).join(slug)
    }

    /// Add a worktree for `slug` on a new branch of the same name, forked from
    /// whatever branch the project root has checked out
    pub async fn create(
        &self,
        project_root: &Path,
        slug: &str,
    ) -> Result<WorkspaceBinding, WorktreeError> {
        validate_branch_name(slug)?;
        let path = self.worktree_path(project_root, slug);
        if path.exists() {
            return Err(WorktreeError::AlreadyExists(path.display().to_string()));
        }

        {
            let repo = Repository::open(project_root)?;
            let base = current_branch(&repo);
            ensure_branch_exists(&repo, slug, &base)?;
            self.register_exclude(&repo)?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path_arg = path.to_string_lossy();
        self.git
            .run_checked(project_root, &["worktree", "add", &path_arg, slug])
            .await?;

        info!("Created worktree {} on branch {}", path.display(), slug);
        Ok(WorkspaceBinding {
            path,
            project_root: project_root.to_path_buf(),
            branch: slug.to_string(),
        })
    }

    /// Remove the worktree directory, forcing if git refuses
    pub async fn remove(&self, binding: &WorkspaceBinding) -> Result<(), WorktreeError> {
        let path_arg = binding.path.to_string_lossy();
        let output = self
            .git
            .run(&binding.project_root, &["worktree", "remove", &path_arg])
            .await?;

        if !output.success {
            warn!(
                "Git worktree remove failed, trying force remove: {}",
                output.stderr
            );
            self.git
                .run_checked(
                    &binding.project_root,
                    &["worktree", "remove", "--force", &path_arg],
                )
                .await?;
        }

        if binding.path.exists() {
            std::fs::remove_dir_all(&binding.path)?;
        }
        info!("Removed worktree {}", binding.path.display());
        Ok(())
    }

    /// Keep our worktree directory out of `git status` for every worktree of the repo
    fn register_exclude(&self, repo: &Repository) -> Result<(), WorktreeError> {
        let Some(top) = self.dir_name.components().next() else {
            return Ok(());
        };
        let pattern = format!("/{}/", top.as_os_str().to_string_lossy());
        let exclude = repo.commondir().join("info").join("exclude");

        let existing = std::fs::read_to_string(&exclude).unwrap_or_default();
        if existing.lines().any(|l| l.trim() == pattern) {
            return Ok(());
        }

        if let Some(parent) = exclude.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&exclude)?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "{}", pattern)?;
        debug!("Added {} to {}", pattern, exclude.display());
        Ok(())
    }
}

fn validate_branch_name(name: &str) -> Result<(), WorktreeError> {
    if name.is_empty() {
        return Err(WorktreeError::InvalidBranchName(
            "Branch name cannot be empty".to_string(),
        ));
    }

    let invalid_chars = [' ', '~', '^', ':', '?', '*', '[', '\\'];
    if name.chars().any(|c| invalid_chars.contains(&c)) {
        return Err(WorktreeError::InvalidBranchName(format!(
            "Branch name contains invalid characters: {}",
            name
        )));
    }

    if name.starts_with('-') || name.ends_with('/') || name.contains("//") || name.contains("..") {
        return Err(WorktreeError::InvalidBranchName(format!(
            "Invalid branch name format: {}",
            name
        )));
    }

    Ok(())
}

fn current_branch(repo: &Repository) -> String {
    if let Ok(head) = repo.head() {
        if let Some(name) = head.shorthand() {
            return name.to_string();
        }
    }
    if repo.find_branch("main", BranchType::Local).is_ok() {
        "main".to_string()
    } else {
        "master".to_string()
    }
}

fn ensure_branch_exists(
    repo: &Repository,
    branch_name: &str,
    base_branch: &str,
) -> Result<(), WorktreeError> {
    if repo.find_branch(branch_name, BranchType::Local).is_ok() {
        debug!("Branch {} already exists", branch_name);
        return Ok(());
    }

    let base_commit = repo
        .find_branch(base_branch, BranchType::Local)?
        .get()
        .peel_to_commit()?;
    repo.branch(branch_name, &base_commit, false)?;
    info!("Created new branch: {} from {}", branch_name, base_branch);
    Ok(())
}
