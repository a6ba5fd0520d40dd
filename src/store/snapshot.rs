// ABOUTME: Persisted registry snapshot (ordered panes plus project settings) written only through write_atomic

use super::{write_atomic, StoreError};
use crate::agents::AgentKind;
use crate::models::Session;
use crate::registry::PaneRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info};

const SNAPSHOT_VERSION: u32 = 1;

/// Per-project settings stored alongside the panes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub project_name: Option<String>,
    pub project_root: Option<PathBuf>,
    pub default_agent: Option<AgentKind>,
    #[serde(default)]
    pub autopilot_by_default: bool,
    pub test_command: Option<String>,
    pub dev_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub panes: Vec<Session>,
    #[serde(default)]
    pub settings: ProjectSettings,
    pub saved_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl RegistrySnapshot {
    pub fn new(panes: Vec<Session>, settings: ProjectSettings) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            panes,
            settings,
            saved_at: Some(Utc::now()),
        }
    }
}

/// Owner of one snapshot file. Writes are serialized so that the file always
/// holds the state read by the most recent writer.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot file for a project inside the data directory
    pub fn for_project(data_dir: &Path, project_name: &str) -> Self {
        let file = format!("{}.panes.json", sanitize_file_stem(project_name));
        Self::new(data_dir.join("projects").join(file))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; `None` when nothing was persisted yet
    pub fn load(&self) -> Result<Option<RegistrySnapshot>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let snapshot: RegistrySnapshot =
            serde_json::from_str(&content).map_err(|e| StoreError::Parse {
                path: self.path.clone(),
                source: e,
            })?;

        info!(
            "Loaded {} panes from {}",
            snapshot.panes.len(),
            self.path.display()
        );
        Ok(Some(snapshot))
    }

    /// Persist the registry's current contents
    pub async fn save(
        &self,
        registry: &PaneRegistry,
        settings: &ProjectSettings,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        // Read under the write lock so a later writer never persists an older state
        let snapshot = RegistrySnapshot::new(registry.list(), settings.clone());
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        // fsync can take a while on a slow disk; keep it off the async workers
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.clone(),
                source: std::io::Error::other(e),
            })??;
        debug!(
            "Persisted {} panes to {}",
            snapshot.panes.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Store, registry and settings bundled so any component can persist the current state
#[derive(Debug, Clone)]
pub struct Persister {
    store: Arc<SnapshotStore>,
    registry: Arc<PaneRegistry>,
    settings: Arc<RwLock<ProjectSettings>>,
}

impl Persister {
    pub fn new(
        store: Arc<SnapshotStore>,
        registry: Arc<PaneRegistry>,
        settings: ProjectSettings,
    ) -> Self {
        Self {
            store,
            registry,
            settings: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn settings(&self) -> ProjectSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_settings(&self, patch: impl FnOnce(&mut ProjectSettings)) {
        patch(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
    }

    pub async fn persist(&self) -> Result<(), StoreError> {
        let settings = self.settings();
        self.store.save(&self.registry, &settings).await
    }
}

fn sanitize_file_stem(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}
