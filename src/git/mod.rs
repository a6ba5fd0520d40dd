// ABOUTME: Git integration: command runner with timeouts, merge-workflow operations, worktree management

pub mod cli;
pub mod operations;
pub mod worktree_manager;

pub use cli::{GitCli, GitError, GitOutput};
pub use operations::MergeAttempt;
pub use worktree_manager::{slugify, WorktreeError, WorktreeManager};
