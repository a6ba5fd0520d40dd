// ABOUTME: CLI watch command - reconcile and monitor a project's panes until ctrl-c

use super::util;
use crate::config::AppConfig;
use anyhow::Result;
use std::path::Path;
use tracing::warn;

pub async fn execute(config: &AppConfig, project: Option<&Path>) -> Result<()> {
    let engine = util::open_engine(config, project)?;
    println!(
        "Watching {} panes in {} (ctrl-c to stop)",
        engine.sessions().len(),
        engine.project_root().display()
    );

    engine
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    println!("Stopped. Snapshot saved to {}", engine.snapshot_path().display());
    Ok(())
}
