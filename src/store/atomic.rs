// ABOUTME: Write-then-rename primitive so no reader ever observes a partially written state file
//
// The temporary file is created next to the target (same directory, same
// filesystem) with a random name, filled, synced and then renamed over the
// target. Dropping a staged write before commit removes the temporary file
// and leaves the target untouched.

use super::StoreError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Bytes written to a sibling temporary file, not yet visible at the target
#[derive(Debug)]
pub struct StagedWrite {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Path of the temporary file holding the staged bytes
    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// Rename the staged file onto the target path
    pub fn commit(self) -> Result<(), StoreError> {
        let target = self.target;
        self.tmp.persist(&target).map_err(|e| StoreError::Io {
            path: target.clone(),
            source: e.error,
        })?;
        debug!("Atomically replaced {}", target.display());
        Ok(())
    }
}

/// Stage `bytes` for `path` without touching `path` itself
pub fn stage_atomic(path: &Path, bytes: &[u8]) -> Result<StagedWrite, StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(dir).map_err(|e| StoreError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| StoreError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

    // On any failure below `tmp` is dropped, which removes the temporary file
    let tmp_path = tmp.path().to_path_buf();
    let io_err = |e| StoreError::Io {
        path: tmp_path.clone(),
        source: e,
    };
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    Ok(StagedWrite {
        tmp,
        target: path.to_path_buf(),
    })
}

/// Replace `path` with `bytes` atomically
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    stage_atomic(path, bytes)?.commit()
}
