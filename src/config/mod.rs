// ABOUTME: Configuration management for panekeeper
// Layered TOML files (system, user, project) plus a few environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::monitor::MonitorSettings;
use crate::status::ClassifierSettings;
use crate::tasks::TaskSettings;
use crate::tmux::capture::CapturePolicy;

pub const DEFAULT_ANALYZER_MODEL: &str = "claude-3-5-haiku-latest";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between two captures of the same pane
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lines captured from the bottom of each pane
    #[serde(default = "default_capture_lines")]
    pub capture_lines: usize,

    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,

    /// How long after a keystroke the user still counts as typing
    #[serde(default = "default_typing_grace_ms")]
    pub typing_grace_ms: u64,

    #[serde(default = "default_disconnected_ticks")]
    pub disconnected_ticks_before_stop: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            capture_lines: default_capture_lines(),
            reconcile_interval_ms: default_reconcile_interval_ms(),
            typing_grace_ms: default_typing_grace_ms(),
            disconnected_ticks_before_stop: default_disconnected_ticks(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Extra lines requested on each retry
    #[serde(default = "default_retry_buffer")]
    pub retry_buffer: usize,

    #[serde(default = "default_ceiling_lines")]
    pub ceiling_lines: usize,

    /// Timeout for each tmux command
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_buffer: default_retry_buffer(),
            ceiling_lines: default_ceiling_lines(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Read from ANTHROPIC_API_KEY when not set here
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_analyzer_timeout_secs")]
    pub timeout_secs: u64,

    /// Screen lines sent with each classification request
    #[serde(default = "default_capture_lines")]
    pub excerpt_lines: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_analyzer_timeout_secs(),
            excerpt_lines: default_capture_lines(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Timeout for each git command
    #[serde(default = "default_git_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Timeout for one-shot agent runs (commit messages, conflict resolution)
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    #[serde(default = "default_fallback_commit_message")]
    pub fallback_commit_message: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_git_timeout_secs(),
            agent_timeout_secs: default_agent_timeout_secs(),
            fallback_commit_message: default_fallback_commit_message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Snapshots and logs live here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Worktree location relative to the project root
    #[serde(default = "default_worktree_dir_name")]
    pub worktree_dir_name: String,

    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worktree_dir_name: default_worktree_dir_name(),
            persist_debounce_ms: default_persist_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Detected from the project files when absent
    #[serde(default)]
    pub test_command: Option<String>,

    #[serde(default)]
    pub dev_command: Option<String>,

    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            dev_command: None,
            output_tail_lines: default_output_tail_lines(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_capture_lines() -> usize {
    50
}

fn default_reconcile_interval_ms() -> u64 {
    1000
}

fn default_typing_grace_ms() -> u64 {
    1500
}

fn default_disconnected_ticks() -> u32 {
    300
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_buffer() -> usize {
    10
}

fn default_ceiling_lines() -> usize {
    1000
}

fn default_command_timeout_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    DEFAULT_ANALYZER_MODEL.to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_analyzer_timeout_secs() -> u64 {
    15
}

fn default_max_tokens() -> u32 {
    512
}

fn default_git_timeout_secs() -> u64 {
    60
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_fallback_commit_message() -> String {
    "chore: save work in progress".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".panekeeper"))
        .unwrap_or_else(|| PathBuf::from(".panekeeper"))
}

fn default_worktree_dir_name() -> String {
    ".panekeeper/worktrees".to_string()
}

fn default_persist_debounce_ms() -> u64 {
    500
}

fn default_output_tail_lines() -> usize {
    40
}

/// Recursively overlay `other` on `base`; tables merge key by key, anything else is replaced
fn merge_values(base: &mut toml::Value, other: toml::Value) {
    match (base, other) {
        (toml::Value::Table(base), toml::Value::Table(other)) => {
            for (key, value) in other {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, other) => *base = other,
    }
}

impl AppConfig {
    /// Load configuration from default locations, then the environment
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_paths(&Self::get_config_paths())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Merge the files that exist, later paths overriding earlier ones field by field
    pub fn load_from_paths(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        for path in paths {
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let layer: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?;
            merge_values(&mut merged, layer);
        }

        merged
            .try_into::<Self>()
            .context("Invalid configuration after merging config files")
    }

    /// Apply PANEKEEPER_* and ANTHROPIC_API_KEY overrides
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("PANEKEEPER_DATA_DIR").filter(|v| !v.is_empty()) {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(model) = var("PANEKEEPER_ANALYZER_MODEL").filter(|v| !v.is_empty()) {
            self.analyzer.model = model;
        }
        if self.analyzer.api_key.is_none() {
            self.analyzer.api_key = var("ANTHROPIC_API_KEY").filter(|v| !v.is_empty());
        }
    }

    /// Configuration file paths, lowest precedence first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/panekeeper/config.toml")];

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".panekeeper").join("config.toml"));
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".panekeeper").join("config.toml"));
        }

        paths
    }

    pub fn log_dir(&self) -> PathBuf {
        self.storage.data_dir.join("logs")
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
            capture_lines: self.monitor.capture_lines,
            disconnected_ticks_before_stop: self.monitor.disconnected_ticks_before_stop,
        }
    }

    pub fn capture_policy(&self) -> CapturePolicy {
        CapturePolicy {
            max_retries: self.capture.max_retries,
            retry_buffer: self.capture.retry_buffer,
            ceiling_lines: self.capture.ceiling_lines,
        }
    }

    pub fn classifier_settings(&self) -> ClassifierSettings {
        ClassifierSettings {
            timeout: Duration::from_secs(self.analyzer.timeout_secs),
            excerpt_lines: self.analyzer.excerpt_lines,
        }
    }

    pub fn task_settings(&self) -> TaskSettings {
        TaskSettings {
            test_command: self.tasks.test_command.clone(),
            dev_command: self.tasks.dev_command.clone(),
            output_tail_lines: self.tasks.output_tail_lines,
            ..TaskSettings::default()
        }
    }

    pub fn worktree_dir(&self) -> &Path {
        Path::new(&self.storage.worktree_dir_name)
    }
}
