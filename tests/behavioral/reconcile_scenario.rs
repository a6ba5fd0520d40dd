// ABOUTME: Behavioral tests for rebinding panes after tmux hands out new pane ids
//
// The engine runs over a real git repository with the fake multiplexer, so a
// pane can be "respawned" under a new handle while keeping its title.

use anyhow::Result;
use panekeeper::agents::AgentKind;
use panekeeper::models::Session;
use panekeeper::reconcile::Reconciler;
use panekeeper::registry::PaneRegistry;
use panekeeper::store::SnapshotStore;
use panekeeper::testing::{FakeAnalyzer, FakeMultiplexer};
use panekeeper::tmux::Multiplexer;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use crate::fixtures::{engine_for, wait_for, ScriptedAgent, TestRepo};

fn reconciler(registry: &Arc<PaneRegistry>, mux: &Arc<FakeMultiplexer>) -> Reconciler {
    Reconciler::new(Arc::clone(registry), Arc::clone(mux) as Arc<dyn Multiplexer>)
}

#[tokio::test]
async fn test_respawned_pane_is_rebound_and_nothing_else_changes() -> Result<()> {
    // GIVEN: a pane whose tmux pane is killed and relaunched under a new id
    let repo = TestRepo::new()?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;
    let session = fx
        .engine
        .create_pane("fix login", Some(AgentKind::Claude), Some(false))
        .await?;
    assert_eq!(session.pane_handle, "%100");
    assert_eq!(fx.mux.pane("%100").unwrap().title, "webapp-fix-login");

    fx.mux.respawn("%100", "%109");

    // WHEN: the engine starts, which reconciles before anything else
    fx.engine.start().await;

    // THEN: only the handle moved
    let rebound = fx.engine.registry().get(session.id).unwrap();
    let mut expected = session.clone();
    expected.pane_handle = "%109".to_string();
    assert_eq!(rebound.pane_handle, expected.pane_handle);
    assert_eq!(rebound.slug, expected.slug);
    assert_eq!(rebound.workspace, expected.workspace);
    assert_eq!(rebound.agent, expected.agent);
    assert!(rebound.pane_connected);

    // THEN: the rebind reaches the snapshot
    let store = SnapshotStore::new(fx.engine.snapshot_path());
    wait_for("rebound handle persisted", || {
        store
            .load()
            .ok()
            .flatten()
            .is_some_and(|s| s.panes.iter().any(|p| p.pane_handle == "%109"))
    })
    .await;

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_respawn_while_running_is_picked_up_by_the_loop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let project = dir.path().join("webapp");
    std::fs::create_dir_all(&project)?;
    let fx = engine_for(&project, ScriptedAgent::unavailable(), FakeAnalyzer::new())?;
    fx.engine.start().await;

    let session = fx.engine.create_terminal_pane("build logs").await?;
    fx.mux.respawn(&session.pane_handle, "%42");

    let registry = Arc::clone(fx.engine.registry());
    wait_for("rebind to %42", || {
        registry.get(session.id).is_some_and(|s| s.pane_handle == "%42")
    })
    .await;

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_two_panes_with_the_same_title_are_not_guessed_between() -> Result<()> {
    let registry = Arc::new(PaneRegistry::new());
    let mux = Arc::new(FakeMultiplexer::new());
    let session = Session::new("fix-login", "%3").with_project_tag("webapp");
    let id = session.id;
    registry.insert(session);

    mux.add_pane("%7", "webapp-fix-login", "");
    mux.add_pane("%8", "webapp-fix-login", "");

    let outcome = reconciler(&registry, &mux).run_pass().await?;

    assert_eq!(outcome.ambiguous, vec![id]);
    assert!(outcome.rebound.is_empty());
    let after = registry.get(id).unwrap();
    assert_eq!(after.pane_handle, "%3");
    assert!(!after.pane_connected);
    Ok(())
}

#[tokio::test]
async fn test_lost_pane_is_kept_disconnected_then_reconnects() -> Result<()> {
    let registry = Arc::new(PaneRegistry::new());
    let mux = Arc::new(FakeMultiplexer::new());
    let session = Session::new("api", "%1").with_project_tag("webapp");
    let id = session.id;
    registry.insert(session);
    let reconciler = reconciler(&registry, &mux);

    // No live pane with that handle or title: stale, not deleted
    let outcome = reconciler.run_pass().await?;
    assert_eq!(outcome.disconnected, vec![id]);
    let stale = registry.get(id).unwrap();
    assert_eq!(stale.pane_handle, "%1");
    assert!(!stale.pane_connected);

    mux.add_pane("%1", "webapp-api", "$");
    let outcome = reconciler.run_pass().await?;
    assert_eq!(outcome.reconnected, vec![id]);
    assert!(registry.get(id).unwrap().pane_connected);
    Ok(())
}

#[tokio::test]
async fn test_failed_listing_leaves_registry_untouched() -> Result<()> {
    let registry = Arc::new(PaneRegistry::new());
    let mux = Arc::new(FakeMultiplexer::new());
    let session = Session::new("api", "%1");
    registry.insert(session.clone());
    mux.fail_listing(true);

    assert!(reconciler(&registry, &mux).run_pass().await.is_err());
    assert_eq!(registry.get(session.id), Some(session));
    Ok(())
}
