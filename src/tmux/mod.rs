// ABOUTME: Tmux command surface used by the engine: capture, list, send keys, split, title, kill
//
// Tmux is driven as a black box through its CLI. Failures show up as a
// non-zero exit or empty output; every call carries a timeout so a wedged
// tmux server cannot block a pane's monitor forever.

pub mod capture;

pub use capture::{strip_ansi_codes, SnapshotReader};

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TmuxError {
    #[error("Failed to run tmux: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("tmux {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("tmux {command} timed out")]
    Timeout { command: String },
}

/// A live pane as reported by `tmux list-panes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    pub handle: String,
    pub title: String,
}

#[async_trait]
pub trait Multiplexer: Send + Sync {
    /// Last `lines` lines of the pane, including trailing blank rows
    async fn capture_tail(&self, handle: &str, lines: usize) -> Result<String, TmuxError>;
    async fn list_panes(&self) -> Result<Vec<PaneInfo>, TmuxError>;
    /// Send keys in `tmux send-keys` notation (e.g. `Enter`, `C-c`, `y`)
    async fn send_keys(&self, handle: &str, keys: &[String]) -> Result<(), TmuxError>;
    /// Type literal text followed by Enter
    async fn send_text(&self, handle: &str, text: &str) -> Result<(), TmuxError>;
    /// Open a new pane in `cwd`, returning its handle
    async fn split_pane(&self, cwd: &Path) -> Result<String, TmuxError>;
    async fn set_pane_title(&self, handle: &str, title: &str) -> Result<(), TmuxError>;
    async fn kill_pane(&self, handle: &str) -> Result<(), TmuxError>;
}

/// [`Multiplexer`] backed by the `tmux` binary
#[derive(Debug, Clone)]
pub struct TmuxClient {
    timeout: Duration,
    socket_name: Option<String>,
}

impl TmuxClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            socket_name: None,
        }
    }

    pub fn with_socket_name(mut self, name: impl Into<String>) -> Self {
        self.socket_name = Some(name.into());
        self
    }

    async fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        let mut cmd = Command::new("tmux");
        if let Some(socket) = &self.socket_name {
            cmd.args(["-L", socket]);
        }
        cmd.args(args).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TmuxError::Timeout {
                command: command.clone(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!("tmux {} failed: {}", command, stderr);
            return Err(TmuxError::CommandFailed { command, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl Multiplexer for TmuxClient {
    async fn capture_tail(&self, handle: &str, lines: usize) -> Result<String, TmuxError> {
        let start = format!("-{}", lines);
        self.run(&["capture-pane", "-p", "-J", "-t", handle, "-S", &start])
            .await
    }

    async fn list_panes(&self) -> Result<Vec<PaneInfo>, TmuxError> {
        let out = self
            .run(&["list-panes", "-a", "-F", "#{pane_id}\t#{pane_title}"])
            .await?;
        Ok(parse_pane_list(&out))
    }

    async fn send_keys(&self, handle: &str, keys: &[String]) -> Result<(), TmuxError> {
        let mut args = vec!["send-keys", "-t", handle];
        args.extend(keys.iter().map(String::as_str));
        self.run(&args).await.map(|_| ())
    }

    async fn send_text(&self, handle: &str, text: &str) -> Result<(), TmuxError> {
        self.run(&["send-keys", "-t", handle, "-l", text]).await?;
        self.run(&["send-keys", "-t", handle, "Enter"]).await.map(|_| ())
    }

    async fn split_pane(&self, cwd: &Path) -> Result<String, TmuxError> {
        let cwd = cwd.to_string_lossy();
        let out = self
            .run(&["split-window", "-d", "-h", "-c", &cwd, "-P", "-F", "#{pane_id}"])
            .await?;
        Ok(out.trim().to_string())
    }

    async fn set_pane_title(&self, handle: &str, title: &str) -> Result<(), TmuxError> {
        self.run(&["select-pane", "-t", handle, "-T", title])
            .await
            .map(|_| ())
    }

    async fn kill_pane(&self, handle: &str) -> Result<(), TmuxError> {
        self.run(&["kill-pane", "-t", handle]).await.map(|_| ())
    }
}

/// Parse `#{pane_id}\t#{pane_title}` lines
pub fn parse_pane_list(output: &str) -> Vec<PaneInfo> {
    output
        .lines()
        .filter_map(|line| {
            let (handle, title) = line.split_once('\t').unwrap_or((line, ""));
            let handle = handle.trim();
            handle.starts_with('%').then(|| PaneInfo {
                handle: handle.to_string(),
                title: title.to_string(),
            })
        })
        .collect()
}
