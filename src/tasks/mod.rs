// ABOUTME: Auxiliary background tasks per pane: a test run and a long-lived dev server
//
// Both run `sh -c <command>` in the pane's worktree. Results land on the
// session (status, output tail, dev server URL) so they show up wherever the
// registry is rendered.

use crate::models::{BackgroundTask, PaneId, TaskStatus};
use crate::registry::PaneRegistry;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

lazy_static! {
    static ref LOCAL_URL: Regex =
        Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1\])(?::\d+)?[^\s'\x22)]*")
            .unwrap();
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Pane {0} not found")]
    PaneNotFound(PaneId),
    #[error("Pane {0} has no workspace")]
    NoWorkspace(PaneId),
    #[error("No {0} command configured or detected in {1}")]
    NoCommand(&'static str, PathBuf),
    #[error("Failed to run task: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub test_command: Option<String>,
    pub dev_command: Option<String>,
    pub output_tail_lines: usize,
    pub test_timeout: Duration,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            test_command: None,
            dev_command: None,
            output_tail_lines: 40,
            test_timeout: Duration::from_secs(900),
        }
    }
}

/// Guess a test command from the project files in `dir`
pub fn detect_test_command(dir: &Path) -> Option<String> {
    let candidates = [
        ("Cargo.toml", "cargo test"),
        ("package.json", "npm test"),
        ("go.mod", "go test ./..."),
        ("pyproject.toml", "pytest"),
        ("pytest.ini", "pytest"),
        ("Makefile", "make test"),
    ];
    candidates
        .iter()
        .find(|(file, _)| dir.join(file).exists())
        .map(|(_, cmd)| (*cmd).to_string())
}

pub fn detect_dev_command(dir: &Path) -> Option<String> {
    let candidates = [
        ("package.json", "npm run dev"),
        ("manage.py", "python manage.py runserver"),
        ("Cargo.toml", "cargo run"),
    ];
    candidates
        .iter()
        .find(|(file, _)| dir.join(file).exists())
        .map(|(_, cmd)| (*cmd).to_string())
}

/// First local URL printed by a server
pub fn scrape_local_url(line: &str) -> Option<String> {
    LOCAL_URL
        .find(line)
        .map(|m| m.as_str().trim_end_matches(['.', ',']).to_string())
}

fn tail(lines: &VecDeque<String>) -> String {
    lines.iter().cloned().collect::<Vec<_>>().join("\n")
}

fn push_bounded(lines: &mut VecDeque<String>, line: String, max: usize) {
    lines.push_back(line);
    while lines.len() > max {
        lines.pop_front();
    }
}

struct DevServer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct TaskRunner {
    registry: Arc<PaneRegistry>,
    settings: TaskSettings,
    dev_servers: Mutex<HashMap<PaneId, DevServer>>,
}

fn shell(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

impl TaskRunner {
    pub fn new(registry: Arc<PaneRegistry>, settings: TaskSettings) -> Self {
        Self {
            registry,
            settings,
            dev_servers: Mutex::new(HashMap::new()),
        }
    }

    fn servers(&self) -> MutexGuard<'_, HashMap<PaneId, DevServer>> {
        self.dev_servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workspace_dir(&self, id: PaneId) -> Result<PathBuf, TaskError> {
        let session = self.registry.get(id).ok_or(TaskError::PaneNotFound(id))?;
        session
            .workspace
            .map(|w| w.path)
            .ok_or(TaskError::NoWorkspace(id))
    }

    fn set_test_run(&self, id: PaneId, patch: impl FnOnce(&mut BackgroundTask)) {
        self.registry.update(id, |s| patch(&mut s.test_run));
    }

    /// Run the test command to completion and record pass or fail
    pub async fn run_tests(&self, id: PaneId) -> Result<TaskStatus, TaskError> {
        let dir = self.workspace_dir(id)?;
        let command = self
            .settings
            .test_command
            .clone()
            .or_else(|| detect_test_command(&dir))
            .ok_or_else(|| TaskError::NoCommand("test", dir.clone()))?;

        info!("Running tests for {}: {}", id.short(), command);
        self.set_test_run(id, |t| {
            t.set(TaskStatus::Running);
            t.output = None;
        });

        let run = shell(&command, &dir).output();
        let (status, output) = match tokio::time::timeout(self.settings.test_timeout, run).await {
            Ok(Ok(output)) => {
                let mut lines = VecDeque::new();
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                for line in combined.lines() {
                    push_bounded(&mut lines, line.to_string(), self.settings.output_tail_lines);
                }
                let status = if output.status.success() {
                    TaskStatus::Passed
                } else {
                    TaskStatus::Failed
                };
                (status, tail(&lines))
            }
            Ok(Err(e)) => {
                self.set_test_run(id, |t| t.set(TaskStatus::Failed));
                return Err(e.into());
            }
            Err(_) => (
                TaskStatus::Failed,
                format!("timed out after {:?}", self.settings.test_timeout),
            ),
        };

        info!("Tests for {} {:?}", id.short(), status);
        self.set_test_run(id, |t| {
            t.set(status);
            t.output = Some(output);
        });
        Ok(status)
    }

    /// Spawn the dev server. Its output tail and first local URL are recorded as they appear.
    pub fn start_dev_server(&self, id: PaneId) -> Result<(), TaskError> {
        let dir = self.workspace_dir(id)?;
        let mut servers = self.servers();
        if servers.get(&id).is_some_and(|s| !s.task.is_finished()) {
            debug!("Dev server for {} already running", id.short());
            return Ok(());
        }

        let command = self
            .settings
            .dev_command
            .clone()
            .or_else(|| detect_dev_command(&dir))
            .ok_or_else(|| TaskError::NoCommand("dev server", dir.clone()))?;

        let mut child = shell(&command, &dir).spawn()?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }

        info!("Started dev server for {}: {}", id.short(), command);
        self.registry.update(id, |s| {
            s.dev_server.set(TaskStatus::Running);
            s.dev_server.output = None;
            s.dev_server.url = None;
        });

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = Arc::clone(&self.registry);
        let max_lines = self.settings.output_tail_lines;

        let task = tokio::spawn(async move {
            let mut lines: VecDeque<String> = VecDeque::new();
            let mut url_found = false;
            let final_status = loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Err(e) = child.kill().await {
                            warn!("Failed to kill dev server for {}: {}", id.short(), e);
                        }
                        break TaskStatus::Stopped;
                    }
                    status = child.wait() => {
                        break match status {
                            Ok(s) if s.success() => TaskStatus::Stopped,
                            _ => TaskStatus::Failed,
                        };
                    }
                    Some(line) = rx.recv() => {
                        let url = if url_found { None } else { scrape_local_url(&line) };
                        push_bounded(&mut lines, line, max_lines);
                        if let Some(url) = url {
                            url_found = true;
                            info!("Dev server for {} listening on {}", id.short(), url);
                            registry.update(id, |s| s.dev_server.url = Some(url));
                        }
                    }
                }
            };

            // Drain whatever was already printed
            while let Ok(line) = rx.try_recv() {
                push_bounded(&mut lines, line, max_lines);
            }
            registry.update(id, |s| {
                s.dev_server.set(final_status);
                s.dev_server.output = Some(tail(&lines));
            });
        });

        servers.insert(id, DevServer { cancel, task });
        Ok(())
    }

    /// Kill the dev server and wait for its status to be recorded
    pub async fn stop_dev_server(&self, id: PaneId) {
        let Some(server) = self.servers().remove(&id) else {
            return;
        };
        server.cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(5), server.task).await.is_err() {
            warn!("Dev server for {} did not stop in time", id.short());
        }
    }

    pub fn dev_server_running(&self, id: PaneId) -> bool {
        self.servers()
            .get(&id)
            .is_some_and(|s| !s.task.is_finished())
    }

    pub async fn stop_all(&self) {
        let ids: Vec<PaneId> = self.servers().keys().copied().collect();
        for id in ids {
            self.stop_dev_server(id).await;
        }
    }
}
