// ABOUTME: On-disk persistence for the pane registry: atomic writes and the snapshot file

pub mod atomic;
pub mod snapshot;

pub use atomic::{stage_atomic, write_atomic, StagedWrite};
pub use snapshot::{Persister, ProjectSettings, RegistrySnapshot, SnapshotStore};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to parse snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
