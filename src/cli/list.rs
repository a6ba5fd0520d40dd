// ABOUTME: CLI list command - print the persisted panes of a project
//
// Reads the snapshot only; nothing here talks to tmux or git.

use super::{util, ListArgs, OutputFormat};
use crate::config::AppConfig;
use crate::models::{AttentionState, Session};
use crate::store::SnapshotStore;
use anyhow::Result;
use std::path::Path;

/// Execute the list command
pub fn execute(
    args: &ListArgs,
    format: OutputFormat,
    config: &AppConfig,
    project: Option<&Path>,
) -> Result<()> {
    let root = util::project_root(project)?;
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string());
    let store = SnapshotStore::for_project(&config.storage.data_dir, &name);

    let panes: Vec<Session> = store
        .load()?
        .map(|snapshot| snapshot.panes)
        .unwrap_or_default()
        .into_iter()
        .filter(|s| !args.waiting || s.attention == AttentionState::Waiting)
        .collect();

    match format {
        OutputFormat::Json => output_json(&panes)?,
        OutputFormat::Text => print!("{}", render_text(&panes)),
    }
    Ok(())
}

fn output_json(panes: &[Session]) -> Result<()> {
    let json = serde_json::to_string_pretty(panes)?;
    println!("{json}");
    Ok(())
}

fn render_text(panes: &[Session]) -> String {
    if panes.is_empty() {
        return "No panes found.\n".to_string();
    }

    let mut out = format!(
        "{:<9} {:<28} {:<12} {:<6} {:<8} BRANCH\n",
        "ID", "NAME", "STATUS", "PANE", "AGENT"
    );
    out.push_str(&"-".repeat(80));
    out.push('\n');

    for pane in panes {
        let status = format!("{} {}", pane.attention.indicator(), pane.attention);
        let handle = if pane.pane_connected {
            pane.pane_handle.clone()
        } else {
            "-".to_string()
        };
        let agent = pane
            .agent
            .map(|a| a.to_string())
            .unwrap_or_else(|| "shell".to_string());
        let branch = pane
            .workspace
            .as_ref()
            .map(|w| w.branch.clone())
            .unwrap_or_default();
        let name = if pane.autopilot {
            format!("{} [auto]", pane.slug)
        } else {
            pane.slug.clone()
        };
        out.push_str(&format!(
            "{:<9} {:<28} {:<12} {:<6} {:<8} {}\n",
            pane.id.short(),
            truncate(&name, 28),
            status,
            handle,
            agent,
            branch
        ));
    }
    out
}

/// Truncate a string to fit in the given width (character-aware for UTF-8)
fn truncate(s: &str, max_len: usize) -> String {
    if max_len <= 3 {
        return ".".repeat(max_len);
    }
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
