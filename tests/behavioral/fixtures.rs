// ABOUTME: Shared test fixtures and utilities for behavioral tests
//
// Provides:
// - TestRepo: Temporary git repository for testing
// - ScriptedAgent: AgentRunner that answers with a fixed reply
// - engine_for(): PaneEngine over a TestRepo with fake tmux and analyzer
// - tmux_available(): Check if tmux is installed
// - require_tmux!(): Skip test if tmux unavailable

use anyhow::Result;
use async_trait::async_trait;
use panekeeper::agents::{AgentKind, AgentRunner};
use panekeeper::app::{EngineDeps, PaneEngine};
use panekeeper::config::AppConfig;
use panekeeper::testing::{FakeAnalyzer, FakeMultiplexer};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Creates a temporary git repository with initial commit
pub struct TestRepo {
    pub dir: TempDir,
    pub path: PathBuf,
}

/// Run git in `cwd`, failing with its stderr
pub fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git").args(args).current_dir(cwd).output()?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}

impl TestRepo {
    /// Create a new temporary git repository with initial commit
    pub fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join("webapp");
        std::fs::create_dir_all(&path)?;

        git(&path, &["init"])?;
        git(&path, &["config", "user.email", "test@test.com"])?;
        git(&path, &["config", "user.name", "Test User"])?;
        git(&path, &["config", "commit.gpgsign", "false"])?;

        std::fs::write(path.join("README.md"), "# Test Repo\n")?;
        git(&path, &["add", "."])?;
        git(&path, &["commit", "-m", "Initial commit"])?;

        Ok(Self { dir, path })
    }

    /// Get the path to the repository
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a file (creating parent directories) and commit it in `cwd`
    pub fn commit_file(cwd: &Path, filename: &str, content: &str, message: &str) -> Result<()> {
        let file = cwd.join(filename);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(file, content)?;
        git(cwd, &["add", filename])?;
        git(cwd, &["commit", "-m", message])?;
        Ok(())
    }

    /// Add a file and commit it on the checked-out branch
    pub fn add_commit(&self, filename: &str, content: &str, message: &str) -> Result<()> {
        Self::commit_file(&self.path, filename, content, message)
    }

    /// Get current branch name
    pub fn current_branch(&self) -> Result<String> {
        git(&self.path, &["branch", "--show-current"])
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(!git(&self.path, &["branch", "--list", branch])?.is_empty())
    }

    pub fn read(&self, filename: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path.join(filename))?)
    }
}

/// Agent stand-in for one-shot runs: answers every prompt with `reply`
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::default(),
        }
    }

    /// Every run fails as if the binary were missing
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run_once(&self, agent: AgentKind, prompt: &str, _cwd: &Path) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => anyhow::bail!("{} is not installed", agent.binary()),
        }
    }
}

pub struct EngineFixture {
    pub engine: PaneEngine,
    pub mux: Arc<FakeMultiplexer>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub agent: Arc<ScriptedAgent>,
    pub data_dir: TempDir,
}

/// Fast-ticking configuration with data kept in `data_dir`
pub fn test_config(data_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.data_dir = data_dir.to_path_buf();
    config.monitor.poll_interval_ms = 20;
    config.monitor.reconcile_interval_ms = 20;
    config.storage.persist_debounce_ms = 20;
    config.merge.fallback_commit_message = "chore: save work".to_string();
    config
}

pub fn engine_for(project: &Path, agent: ScriptedAgent, analyzer: FakeAnalyzer) -> Result<EngineFixture> {
    engine_with(project, agent, analyzer, |_| {})
}

/// Like [`engine_for`], letting the caller adjust the test configuration first
pub fn engine_with(
    project: &Path,
    agent: ScriptedAgent,
    analyzer: FakeAnalyzer,
    tweak: impl FnOnce(&mut AppConfig),
) -> Result<EngineFixture> {
    let data_dir = TempDir::new()?;
    let mut config = test_config(data_dir.path());
    tweak(&mut config);
    let mux = Arc::new(FakeMultiplexer::new());
    let analyzer = Arc::new(analyzer);
    let agent = Arc::new(agent);

    let engine = PaneEngine::new(
        config,
        project,
        EngineDeps {
            mux: mux.clone(),
            analyzer: analyzer.clone(),
            agents: agent.clone(),
        },
    );
    Ok(EngineFixture {
        engine,
        mux,
        analyzer,
        agent,
        data_dir,
    })
}

/// Poll `done` until it holds, failing after five seconds
pub async fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Check if tmux is available on the system
pub fn tmux_available() -> bool {
    Command::new("tmux")
        .args(["-V"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Macro to skip test if tmux is not available
#[macro_export]
macro_rules! require_tmux {
    () => {
        if !super::fixtures::tmux_available() {
            eprintln!("Skipping test: tmux not available");
            return Ok(());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_creation() -> Result<()> {
        let repo = TestRepo::new()?;
        assert!(repo.path().join(".git").exists());
        assert!(repo.path().join("README.md").exists());
        Ok(())
    }

    #[test]
    fn test_repo_add_commit() -> Result<()> {
        let repo = TestRepo::new()?;
        repo.add_commit("src/a.ts", "one\n", "Add a")?;
        assert_eq!(repo.read("src/a.ts")?, b"one\n");
        Ok(())
    }
}
