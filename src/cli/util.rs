// ABOUTME: Shared CLI utilities: project discovery, engine setup and pane lookup
//
// Panes are matched by id prefix first, then by slug prefix, so the short ids
// printed by `list` can be pasted straight back.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::app::{EngineDeps, PaneEngine};
use crate::config::AppConfig;
use crate::models::Session;

/// Root of the git project containing `start` (its main worktree)
pub fn project_root(start: Option<&Path>) -> Result<PathBuf> {
    let start = match start {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };
    let repo = git2::Repository::discover(&start)
        .with_context(|| format!("{} is not inside a git repository", start.display()))?;

    // From inside a linked worktree, commondir points at the main repository's .git
    let common = repo.commondir();
    let root = common
        .parent()
        .filter(|_| common.ends_with(".git"))
        .map(Path::to_path_buf)
        .or_else(|| repo.workdir().map(Path::to_path_buf))
        .ok_or_else(|| anyhow!("{} is a bare repository", start.display()))?;
    Ok(root)
}

/// Engine for the project with its snapshot loaded
pub fn open_engine(config: &AppConfig, project: Option<&Path>) -> Result<PaneEngine> {
    let root = project_root(project)?;
    let deps = EngineDeps::from_config(config)?;
    let engine = PaneEngine::new(config.clone(), root, deps);
    engine.load().with_context(|| {
        format!(
            "Failed to load pane snapshot {}",
            engine.snapshot_path().display()
        )
    })?;
    Ok(engine)
}

/// Find a pane by id (full or prefix) or slug prefix
///
/// Matching priority:
/// 1. Exact id match
/// 2. Id prefix match (e.g., "abc" matches "abc12345-...")
/// 3. Slug prefix match (case-insensitive)
///
/// Returns an error if no match is found or if multiple panes match.
pub fn find_session(id_or_slug: &str, sessions: &[Session]) -> Result<Session> {
    if sessions.is_empty() {
        return Err(anyhow!("No panes found for this project."));
    }

    if let Ok(id) = id_or_slug.parse() {
        if let Some(session) = sessions.iter().find(|s| s.id == id) {
            return Ok(session.clone());
        }
    }

    let needle = id_or_slug.to_lowercase();
    let id_matches: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(&needle))
        .collect();

    match id_matches.len() {
        1 => return Ok(id_matches[0].clone()),
        n if n > 1 => {
            return Err(anyhow!(
                "Ambiguous pane id prefix '{id_or_slug}'. Matches:\n{}",
                describe(&id_matches)
            ));
        }
        _ => {}
    }

    let slug_matches: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.slug.to_lowercase().starts_with(&needle))
        .collect();

    match slug_matches.len() {
        1 => Ok(slug_matches[0].clone()),
        n if n > 1 => Err(anyhow!(
            "Ambiguous pane name prefix '{id_or_slug}'. Matches:\n{}",
            describe(&slug_matches)
        )),
        _ => {
            let all: Vec<&Session> = sessions.iter().collect();
            Err(anyhow!(
                "No pane found matching '{id_or_slug}'. Available panes:\n{}",
                describe(&all)
            ))
        }
    }
}

fn describe(sessions: &[&Session]) -> String {
    sessions
        .iter()
        .map(|s| format!("  {} ({})", s.id.short(), s.slug))
        .collect::<Vec<_>>()
        .join("\n")
}
