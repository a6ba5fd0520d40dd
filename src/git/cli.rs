// ABOUTME: Runs the git binary with a timeout and non-interactive environment

use std::path::Path;
use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("git {args} failed ({code:?}): {stderr}")]
    CommandFailed {
        args: String,
        stderr: String,
        code: Option<i32>,
    },
    #[error("git {args} timed out")]
    Timeout { args: String },
}

/// Raw result of a git invocation that is allowed to fail
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl From<Output> for GitOutput {
    fn from(output: Output) -> Self {
        Self {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run git in `cwd`; a non-zero exit is returned, not raised
    pub async fn run(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let joined = args.join(" ");
        debug!("git {} (in {})", joined, cwd.display());

        let mut cmd = Command::new("git");
        cmd.current_dir(cwd)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ASKPASS", "echo")
            .env("GIT_EDITOR", "true")
            .env("GIT_MERGE_AUTOEDIT", "no")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitError::Timeout {
                args: joined.clone(),
            })??;
        Ok(output.into())
    }

    /// Run git in `cwd` and return stdout, failing on a non-zero exit
    pub async fn run_checked(&self, cwd: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(cwd, args).await?;
        if !output.success {
            return Err(GitError::CommandFailed {
                args: args.join(" "),
                stderr: output.stderr,
                code: output.code,
            });
        }
        Ok(output.stdout)
    }
}
