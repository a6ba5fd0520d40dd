// ABOUTME: CLI close command - drop a pane and its worktree without merging

use super::{util, CloseArgs};
use crate::config::AppConfig;
use anyhow::Result;
use std::path::Path;

pub async fn execute(args: &CloseArgs, config: &AppConfig, project: Option<&Path>) -> Result<()> {
    let engine = util::open_engine(config, project)?;
    let session = util::find_session(&args.pane, &engine.sessions())?;

    let branch_deleted = engine.request_close(session.id).await?;
    match (&session.workspace, branch_deleted) {
        (Some(w), true) => println!("Closed {} and deleted branch {}", session.slug, w.branch),
        (Some(w), false) => println!(
            "Closed {}; branch {} has unmerged commits and was kept",
            session.slug, w.branch
        ),
        (None, _) => println!("Closed {}", session.slug),
    }
    Ok(())
}
