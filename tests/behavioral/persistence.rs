// ABOUTME: Behavioral tests for the registry snapshot across engine restarts
//
// A second engine is opened over the same data directory and project to play
// the part of the next process.

use anyhow::Result;
use panekeeper::agents::AgentKind;
use panekeeper::app::{EngineDeps, PaneEngine};
use panekeeper::models::TaskStatus;
use panekeeper::store::{stage_atomic, SnapshotStore};
use panekeeper::testing::{FakeAnalyzer, FakeMultiplexer};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

use crate::fixtures::{engine_with, test_config, EngineFixture, ScriptedAgent, TestRepo};

/// A fresh engine over the same snapshot, as after a restart
fn reopen(fx: &EngineFixture, project: &Path) -> Result<PaneEngine> {
    let engine = PaneEngine::new(
        test_config(fx.data_dir.path()),
        project,
        EngineDeps {
            mux: Arc::new(FakeMultiplexer::new()),
            analyzer: Arc::new(FakeAnalyzer::new()),
            agents: Arc::new(ScriptedAgent::unavailable()),
        },
    );
    engine.load()?;
    Ok(engine)
}

#[tokio::test]
async fn test_restart_restores_exactly_the_last_state() -> Result<()> {
    let repo = TestRepo::new()?;
    let fx = engine_with(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new(), |_| {})?;

    let first = fx
        .engine
        .create_pane("fix login", Some(AgentKind::Claude), Some(false))
        .await?;
    let second = fx.engine.create_terminal_pane("logs").await?;
    fx.engine.rename(second.id, "server logs").await?;
    fx.engine.toggle_autopilot(first.id).await?;
    fx.engine.shutdown().await?;
    let last_state = fx.engine.sessions();

    let restarted = reopen(&fx, repo.path())?;
    assert_eq!(restarted.sessions(), last_state);
    assert_eq!(restarted.sessions()[1].slug, "server-logs");
    assert!(restarted.sessions()[0].autopilot);
    Ok(())
}

#[tokio::test]
async fn test_interrupted_write_keeps_previous_snapshot() -> Result<()> {
    let repo = TestRepo::new()?;
    let fx = engine_with(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new(), |_| {})?;
    fx.engine.create_terminal_pane("shell").await?;
    let committed = std::fs::read(fx.engine.snapshot_path())?;

    // A write that dies between the temporary file and the rename
    let staged = stage_atomic(fx.engine.snapshot_path(), b"{ \"panes\": [ {")?;
    drop(staged);

    assert_eq!(std::fs::read(fx.engine.snapshot_path())?, committed);
    let loaded = SnapshotStore::new(fx.engine.snapshot_path()).load()?.unwrap();
    assert_eq!(loaded.panes, fx.engine.sessions());

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_test_run_result_survives_restart() -> Result<()> {
    let repo = TestRepo::new()?;
    let fx = engine_with(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new(), |config| {
        config.tasks.test_command = Some("echo all green".to_string());
    })?;
    let session = fx
        .engine
        .create_pane("add tests", Some(AgentKind::Claude), Some(false))
        .await?;

    assert_eq!(fx.engine.run_tests(session.id).await?, TaskStatus::Passed);
    fx.engine.shutdown().await?;

    let restarted = reopen(&fx, repo.path())?;
    let test_run = restarted.registry().get(session.id).unwrap().test_run;
    assert_eq!(test_run.status, TaskStatus::Passed);
    assert!(test_run.output.unwrap_or_default().contains("all green"));
    Ok(())
}

#[tokio::test]
async fn test_missing_snapshot_loads_nothing() -> Result<()> {
    let repo = TestRepo::new()?;
    let fx = engine_with(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new(), |_| {})?;
    assert_eq!(fx.engine.load()?, 0);
    assert!(fx.engine.sessions().is_empty());
    Ok(())
}
