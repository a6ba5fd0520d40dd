// ABOUTME: Supported coding-agent CLIs: launch commands, busy markers and scripted one-shot runs
//
// Agents are only ever observed through their terminal output. The one-shot
// runner is used for commit messages and is the only place we read an agent's
// stdout directly.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Opencode,
}

impl AgentKind {
    pub const ALL: [Self; 3] = [Self::Claude, Self::Codex, Self::Opencode];

    pub fn binary(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Opencode => "opencode",
        }
    }

    /// Interactive launch line typed into a fresh pane
    pub fn launch_command(&self, prompt: Option<&str>, autopilot: bool) -> String {
        let mut parts: Vec<String> = vec![self.binary().to_string()];
        if autopilot {
            match self {
                Self::Claude => parts.push("--dangerously-skip-permissions".into()),
                Self::Codex => parts.push("--dangerously-bypass-approvals-and-sandbox".into()),
                Self::Opencode => {}
            }
        }
        if let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) {
            if *self == Self::Opencode {
                parts.push("--prompt".into());
            }
            parts.push(shell_escape::escape(prompt.into()).into_owned());
        }
        parts.join(" ")
    }

    /// Arguments for a non-interactive, print-and-exit invocation
    pub fn one_shot_args(&self, prompt: &str) -> Vec<String> {
        match self {
            Self::Claude => vec!["-p".into(), prompt.into()],
            Self::Codex => vec!["exec".into(), prompt.into()],
            Self::Opencode => vec!["run".into(), prompt.into()],
        }
    }

    /// Screen fragments that only appear while the agent is busy
    pub fn busy_markers(&self) -> &'static [&'static str] {
        match self {
            Self::Claude => &["esc to interrupt", "ctrl+c to interrupt"],
            Self::Codex => &["Esc to interrupt", "Working ("],
            Self::Opencode => &["esc interrupt", "Working..."],
        }
    }

    pub fn is_installed(&self) -> bool {
        which::which(self.binary()).is_ok()
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

impl std::str::FromStr for AgentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "opencode" => Ok(Self::Opencode),
            other => bail!("Unknown agent: {}", other),
        }
    }
}

/// Non-interactive agent invocation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_once(&self, agent: AgentKind, prompt: &str, cwd: &Path) -> Result<String>;
}

/// Runs the real agent binaries as child processes
#[derive(Debug, Clone)]
pub struct CliAgentRunner {
    timeout: Duration,
}

impl CliAgentRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl AgentRunner for CliAgentRunner {
    async fn run_once(&self, agent: AgentKind, prompt: &str, cwd: &Path) -> Result<String> {
        if !agent.is_installed() {
            bail!("{} is not installed", agent.binary());
        }

        debug!("Running one-shot {} in {}", agent, cwd.display());
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(agent.binary())
                .args(agent.one_shot_args(prompt))
                .current_dir(cwd)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("{} timed out after {:?}", agent, self.timeout))?
        .with_context(|| format!("Failed to spawn {}", agent))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("One-shot {} failed: {}", agent, stderr.trim());
            bail!("{} exited with {}", agent, output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Turn free-form agent output into a single commit message
pub fn clean_commit_message(raw: &str) -> Option<String> {
    let message: Vec<&str> = raw
        .lines()
        .map(str::trim_end)
        .skip_while(|l| l.trim().is_empty() || l.trim_start().starts_with("```"))
        .take_while(|l| !l.trim_start().starts_with("```"))
        .collect();
    let message = message.join("\n");
    let message = message.trim().trim_matches('"').trim_matches('`').trim();
    if message.is_empty() {
        None
    } else {
        Some(message.to_string())
    }
}
