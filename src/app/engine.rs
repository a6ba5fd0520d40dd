// ABOUTME: PaneEngine wires the registry, monitors, reconciler, merge workflow and tasks together
//
// Every user-facing action goes through here. Lifecycle actions (create,
// merge, close, rename) persist synchronously before returning; everything
// else reaches disk through the debounced writer started by `start`.

use crate::agents::{AgentKind, AgentRunner, CliAgentRunner};
use crate::config::AppConfig;
use crate::git::{slugify, GitCli, WorktreeError, WorktreeManager};
use crate::merge::{BatchResult, IssueOutcome, MergeError, MergeOrchestrator, MergeOutcome};
use crate::models::{MergeIssue, PaneId, RequestId, Resolution, Session, TaskStatus};
use crate::monitor::{InputTracker, MonitorSupervisor};
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::registry::{PaneRegistry, RegistryEvent};
use crate::status::{
    AnalyzerError, ClaudeAnalyzer, DisabledAnalyzer, PaneAnalyzer, StatusClassifier,
};
use crate::store::{Persister, ProjectSettings, SnapshotStore, StoreError};
use crate::tasks::{TaskError, TaskRunner};
use crate::tmux::{Multiplexer, SnapshotReader, TmuxClient, TmuxError};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SLUG_WORDS: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Pane {0} not found")]
    PaneNotFound(PaneId),
    #[error("Pane {0} has no workspace")]
    NoWorkspace(PaneId),
    #[error("Invalid pane name: {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Tmux(#[from] TmuxError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

/// The external seams: tmux, the classification model and the agent CLIs
#[derive(Clone)]
pub struct EngineDeps {
    pub mux: Arc<dyn Multiplexer>,
    pub analyzer: Arc<dyn PaneAnalyzer>,
    pub agents: Arc<dyn AgentRunner>,
}

impl EngineDeps {
    /// Real tmux, the Anthropic analyzer when a key is available, and the installed agent CLIs
    pub fn from_config(config: &AppConfig) -> Result<Self, EngineError> {
        let mux = TmuxClient::new(Duration::from_millis(config.capture.command_timeout_ms));

        let analyzer: Arc<dyn PaneAnalyzer> =
            match (&config.analyzer.api_key, config.analyzer.enabled) {
                (Some(key), true) => Arc::new(
                    ClaudeAnalyzer::new(
                        key.clone(),
                        config.analyzer.base_url.clone(),
                        config.analyzer.model.clone(),
                        Duration::from_secs(config.analyzer.timeout_secs),
                    )?
                    .with_max_tokens(config.analyzer.max_tokens),
                ),
                _ => {
                    info!("Status analyzer disabled; ambiguous panes will settle as idle");
                    Arc::new(DisabledAnalyzer)
                }
            };

        Ok(Self {
            mux: Arc::new(mux),
            analyzer,
            agents: Arc::new(CliAgentRunner::new(Duration::from_secs(
                config.merge.agent_timeout_secs,
            ))),
        })
    }
}

pub struct PaneEngine {
    config: AppConfig,
    project_root: PathBuf,
    project_name: String,
    registry: Arc<PaneRegistry>,
    mux: Arc<dyn Multiplexer>,
    reader: SnapshotReader,
    classifier: StatusClassifier,
    supervisor: Arc<MonitorSupervisor>,
    reconciler: Arc<Reconciler>,
    worktrees: Arc<WorktreeManager>,
    orchestrator: MergeOrchestrator,
    persister: Persister,
    tasks: TaskRunner,
    input: Arc<InputTracker>,
    background: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

fn project_name_of(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

impl PaneEngine {
    pub fn new(config: AppConfig, project_root: impl Into<PathBuf>, deps: EngineDeps) -> Self {
        let project_root = project_root.into();
        let project_name = project_name_of(&project_root);
        let store = SnapshotStore::for_project(&config.storage.data_dir, &project_name);
        Self::with_store(config, project_root, deps, store)
    }

    /// Same as [`PaneEngine::new`] with an explicit snapshot location
    pub fn with_store(
        config: AppConfig,
        project_root: impl Into<PathBuf>,
        deps: EngineDeps,
        store: SnapshotStore,
    ) -> Self {
        let project_root = project_root.into();
        let project_name = project_name_of(&project_root);
        let registry = Arc::new(PaneRegistry::new());

        let persister = Persister::new(
            Arc::new(store),
            Arc::clone(&registry),
            ProjectSettings {
                project_name: Some(project_name.clone()),
                project_root: Some(project_root.clone()),
                test_command: config.tasks.test_command.clone(),
                dev_command: config.tasks.dev_command.clone(),
                ..ProjectSettings::default()
            },
        );

        let reader = SnapshotReader::new(Arc::clone(&deps.mux), config.capture_policy());
        let classifier = StatusClassifier::new(
            Arc::clone(&registry),
            Arc::clone(&deps.analyzer),
            Arc::clone(&deps.mux),
            config.classifier_settings(),
        );
        let input = Arc::new(InputTracker::new(Duration::from_millis(
            config.monitor.typing_grace_ms,
        )));
        let supervisor = Arc::new(MonitorSupervisor::new(
            Arc::clone(&registry),
            reader.clone(),
            classifier.clone(),
            Arc::clone(&input),
            config.monitor_settings(),
        ));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&registry), Arc::clone(&deps.mux)));

        let git = GitCli::new(Duration::from_secs(config.merge.command_timeout_secs));
        let worktrees = Arc::new(WorktreeManager::new(git.clone(), config.worktree_dir()));
        let orchestrator = MergeOrchestrator::new(
            Arc::clone(&registry),
            git,
            Arc::clone(&worktrees),
            deps.agents,
            persister.clone(),
            config.merge.fallback_commit_message.clone(),
        );
        let tasks = TaskRunner::new(Arc::clone(&registry), config.task_settings());

        Self {
            config,
            project_root,
            project_name,
            registry,
            mux: deps.mux,
            reader,
            classifier,
            supervisor,
            reconciler,
            worktrees,
            orchestrator,
            persister,
            tasks,
            input,
            background: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<PaneRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.registry.list()
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn snapshot_path(&self) -> &Path {
        self.persister.store().path()
    }

    pub fn is_monitoring(&self, id: PaneId) -> bool {
        self.supervisor.is_running(id)
    }

    fn session(&self, id: PaneId) -> Result<Session, EngineError> {
        self.registry.get(id).ok_or(EngineError::PaneNotFound(id))
    }

    /// Restore panes and settings from the snapshot. Returns how many panes were loaded.
    pub fn load(&self) -> Result<usize, EngineError> {
        let Some(snapshot) = self.persister.store().load()? else {
            return Ok(0);
        };
        let count = snapshot.panes.len();
        self.registry.replace_all(snapshot.panes);

        let saved = snapshot.settings;
        self.persister.update_settings(|settings| {
            settings.default_agent = saved.default_agent;
            settings.autopilot_by_default = saved.autopilot_by_default;
            settings.test_command = settings.test_command.take().or(saved.test_command);
            settings.dev_command = settings.dev_command.take().or(saved.dev_command);
        });
        Ok(count)
    }

    /// Reconcile once, start a monitor per connected pane, then keep reconciling
    /// and persisting in the background until `shutdown`
    pub async fn start(&self) {
        match self.reconciler.run_pass().await {
            Ok(outcome) => log_outcome(&outcome),
            Err(e) => warn!("Initial pane listing failed: {}", e),
        }
        resume_monitors(&self.registry, &self.supervisor);

        let reconcile = tokio::spawn(reconcile_loop(
            Arc::clone(&self.reconciler),
            Arc::clone(&self.supervisor),
            Arc::clone(&self.registry),
            Duration::from_millis(self.config.monitor.reconcile_interval_ms),
            self.background.child_token(),
        ));
        let persist = tokio::spawn(persist_on_change(
            self.persister.clone(),
            self.registry.subscribe(),
            Duration::from_millis(self.config.storage.persist_debounce_ms),
            self.background.child_token(),
        ));

        let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
        loops.push(reconcile);
        loops.push(persist);
        info!(
            "Watching {} panes of project {}",
            self.registry.len(),
            self.project_name
        );
    }

    /// Run until `signal` completes, then shut down
    pub async fn run_until(&self, signal: impl Future<Output = ()>) -> Result<(), EngineError> {
        self.start().await;
        signal.await;
        self.shutdown().await
    }

    /// Stop every background activity and write a final snapshot
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.background.cancel();
        self.supervisor.stop_all();
        let loops: Vec<JoinHandle<()>> = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in loops {
            if let Err(e) = handle.await {
                debug!("Background loop ended abnormally: {}", e);
            }
        }
        self.tasks.stop_all().await;
        self.persister.persist().await?;
        info!("Engine stopped");
        Ok(())
    }

    fn unique_slug(&self, base: &str) -> String {
        let taken: HashSet<String> = self.registry.list().into_iter().map(|s| s.slug).collect();
        let is_free = |slug: &str| {
            !taken.contains(slug)
                && !self
                    .worktrees
                    .worktree_path(&self.project_root, slug)
                    .exists()
        };

        if is_free(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{base}-{n}"))
            .find(|candidate| is_free(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Launch `agent` on `prompt` in a fresh worktree and pane
    pub async fn create_pane(
        &self,
        prompt: &str,
        agent: Option<AgentKind>,
        autopilot: Option<bool>,
    ) -> Result<Session, EngineError> {
        let settings = self.persister.settings();
        let agent = agent.or(settings.default_agent).unwrap_or(AgentKind::Claude);
        let autopilot = autopilot.unwrap_or(settings.autopilot_by_default);

        let base = slugify(prompt, SLUG_WORDS);
        let base = if base.is_empty() { "pane".to_string() } else { base };
        let slug = self.unique_slug(&base);

        let workspace = self.worktrees.create(&self.project_root, &slug).await?;
        let handle = match self.mux.split_pane(&workspace.path).await {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(cleanup) = self.worktrees.remove(&workspace).await {
                    warn!("Could not remove worktree after failed split: {}", cleanup);
                }
                return Err(e.into());
            }
        };

        let mut session = Session::new(slug, handle)
            .with_project_tag(self.project_name.clone())
            .with_workspace(workspace)
            .with_agent(agent);
        session.autopilot = autopilot;
        session.prompt = Some(prompt.to_string()).filter(|p| !p.trim().is_empty());

        self.title_pane(&session).await;
        self.mux
            .send_text(
                &session.pane_handle,
                &agent.launch_command(session.prompt.as_deref(), autopilot),
            )
            .await?;

        self.register(session).await
    }

    /// A plain shell pane in the project root, with no worktree and no agent
    pub async fn create_terminal_pane(&self, name: &str) -> Result<Session, EngineError> {
        let base = slugify(name, SLUG_WORDS);
        let base = if base.is_empty() { "terminal".to_string() } else { base };
        let slug = self.unique_slug(&base);

        let handle = self.mux.split_pane(&self.project_root).await?;
        let session = Session::new(slug, handle).with_project_tag(self.project_name.clone());
        self.title_pane(&session).await;
        self.register(session).await
    }

    async fn register(&self, session: Session) -> Result<Session, EngineError> {
        let id = session.id;
        self.registry.insert(session.clone());
        self.persister.persist().await?;
        self.supervisor.start(id);
        info!("Created pane {} ({})", session.slug, session.pane_handle);
        Ok(session)
    }

    async fn title_pane(&self, session: &Session) {
        if let Err(e) = self
            .mux
            .set_pane_title(&session.pane_handle, &session.pane_title())
            .await
        {
            warn!("Could not title pane {}: {}", session.pane_handle, e);
        }
    }

    /// Stop everything attached to a pane that has left the registry
    async fn teardown(&self, session: &Session) {
        self.supervisor.stop(session.id);
        self.tasks.stop_dev_server(session.id).await;
        if let Err(e) = self.mux.kill_pane(&session.pane_handle).await {
            debug!("Pane {} already gone: {}", session.pane_handle, e);
        }
    }

    pub async fn request_merge(&self, id: PaneId) -> Result<MergeOutcome, EngineError> {
        self.session(id)?;
        let outcome = self.orchestrator.merge(id).await?;
        if let MergeOutcome::Merged { session, .. } = &outcome {
            self.teardown(session).await;
        }
        Ok(outcome)
    }

    pub async fn resolve_issue(
        &self,
        id: PaneId,
        issue: &MergeIssue,
        resolution: Resolution,
    ) -> Result<IssueOutcome, EngineError> {
        let outcome = self.orchestrator.resolve_issue(id, issue, resolution).await?;
        match &outcome {
            IssueOutcome::Retried(MergeOutcome::Merged { session, .. })
            | IssueOutcome::Closed { session, .. } => self.teardown(session).await,
            _ => {}
        }
        Ok(outcome)
    }

    pub async fn merge_many(&self, ids: &[PaneId]) -> Vec<(PaneId, BatchResult)> {
        let results = self.orchestrator.merge_many(ids).await;
        for (_, result) in &results {
            if let BatchResult::Merged(session) = result {
                self.teardown(session).await;
            }
        }
        results
    }

    /// Close without merging. Returns whether the branch was deleted.
    pub async fn request_close(&self, id: PaneId) -> Result<bool, EngineError> {
        self.supervisor.stop(id);
        let (session, branch_deleted) = self.orchestrator.close(id).await?;
        self.teardown(&session).await;
        Ok(branch_deleted)
    }

    /// Capture the pane now and classify it, superseding any pending request
    pub async fn request_status_refresh(&self, id: PaneId) -> Result<RequestId, EngineError> {
        let session = self.session(id)?;
        let content = self
            .reader
            .capture(&session.pane_handle, self.config.monitor.capture_lines)
            .await;
        self.classifier
            .refresh(id, &content)
            .ok_or(EngineError::PaneNotFound(id))
    }

    pub async fn rename(&self, id: PaneId, name: &str) -> Result<Session, EngineError> {
        let slug = slugify(name, usize::MAX);
        if slug.is_empty() {
            return Err(EngineError::InvalidName(name.to_string()));
        }
        let session = self
            .registry
            .update_with(id, |s| {
                s.slug = slug;
                s.clone()
            })
            .ok_or(EngineError::PaneNotFound(id))?;

        if session.pane_connected {
            self.title_pane(&session).await;
        }
        self.persister.persist().await?;
        info!("Renamed pane {} to {}", id.short(), session.slug);
        Ok(session)
    }

    /// Flip autopilot. Returns the new value.
    pub async fn toggle_autopilot(&self, id: PaneId) -> Result<bool, EngineError> {
        let enabled = self
            .registry
            .update_with(id, |s| {
                s.autopilot = !s.autopilot;
                s.autopilot
            })
            .ok_or(EngineError::PaneNotFound(id))?;
        self.persister.persist().await?;
        info!(
            "Autopilot {} for pane {}",
            if enabled { "on" } else { "off" },
            id.short()
        );
        Ok(enabled)
    }

    /// Record a keystroke forwarded to the pane
    pub fn note_user_input(&self, id: PaneId) {
        self.input.note(id);
    }

    pub async fn run_tests(&self, id: PaneId) -> Result<TaskStatus, EngineError> {
        Ok(self.tasks.run_tests(id).await?)
    }

    pub fn start_dev_server(&self, id: PaneId) -> Result<(), EngineError> {
        Ok(self.tasks.start_dev_server(id)?)
    }

    pub async fn stop_dev_server(&self, id: PaneId) {
        self.tasks.stop_dev_server(id).await;
    }
}

impl Drop for PaneEngine {
    fn drop(&mut self) {
        self.background.cancel();
    }
}

fn log_outcome(outcome: &ReconcileOutcome) {
    if outcome.changed() {
        debug!(
            "Reconcile: {} rebound, {} reconnected, {} disconnected",
            outcome.rebound.len(),
            outcome.reconnected.len(),
            outcome.disconnected.len()
        );
    }
}

/// Connected panes get a monitor; a monitor that gave up on a dead pane restarts once the pane is back
fn resume_monitors(registry: &PaneRegistry, supervisor: &MonitorSupervisor) {
    for session in registry.list() {
        if session.pane_connected && !supervisor.is_running(session.id) {
            supervisor.start(session.id);
        }
    }
}

async fn reconcile_loop(
    reconciler: Arc<Reconciler>,
    supervisor: Arc<MonitorSupervisor>,
    registry: Arc<PaneRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match reconciler.run_pass().await {
            Ok(outcome) => {
                log_outcome(&outcome);
                resume_monitors(&registry, &supervisor);
            }
            Err(e) => warn!("Pane listing failed, keeping registry as is: {}", e),
        }
    }
}

/// Persist at most once per `debounce` while the registry keeps changing
async fn persist_on_change(
    persister: Persister,
    mut events: broadcast::Receiver<RegistryEvent>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                if let Err(broadcast::error::RecvError::Closed) = event {
                    break;
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(debounce) => {}
        }
        // Everything that arrived during the wait is covered by this write
        while let Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) = events.try_recv() {}

        if let Err(e) = persister.persist().await {
            warn!("Debounced persist failed: {}", e);
        }
    }
}
