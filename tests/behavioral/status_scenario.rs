// ABOUTME: Behavioral tests for attention tracking from screen captures through the analyzer
//
// A terminal pane is created through the engine and its fake screen is held
// still, so every tick after the first sees static activity.

use anyhow::Result;
use panekeeper::models::{AttentionState, OptionChoice, WaitingPrompt};
use panekeeper::status::{AnalysisVerdict, AnalyzerError};
use panekeeper::testing::FakeAnalyzer;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use crate::fixtures::{engine_with, wait_for, EngineFixture, ScriptedAgent};

const PROMPT_SCREEN: &str = "$ cargo test\n    Finished test [unoptimized] target(s)\ntest result: ok. 12 passed\n$";

fn project() -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let project = dir.path().join("webapp");
    std::fs::create_dir_all(&project)?;
    Ok((dir, project))
}

fn fixture(project: &PathBuf, analyzer: FakeAnalyzer) -> Result<EngineFixture> {
    engine_with(project, ScriptedAgent::unavailable(), analyzer, |config| {
        config.monitor.typing_grace_ms = 300;
    })
}

#[tokio::test]
async fn test_still_screen_goes_to_analyzing_with_one_call() -> Result<()> {
    // GIVEN: the analyzer holds every call so the pane stays in flight
    let (_dir, project) = project()?;
    let fx = fixture(&project, FakeAnalyzer::held())?;
    let session = fx.engine.create_terminal_pane("tests").await?;
    fx.mux.set_screen(&session.pane_handle, PROMPT_SCREEN);

    // WHEN: identical captures keep arriving
    let registry = fx.engine.registry().clone();
    wait_for("analyzing", || {
        registry
            .get(session.id)
            .is_some_and(|s| s.attention == AttentionState::Analyzing)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // THEN: exactly one call was made and one request recorded
    assert_eq!(fx.analyzer.calls(), 1);
    let pending = registry.get(session.id).unwrap();
    assert_eq!(pending.attention, AttentionState::Analyzing);
    assert!(pending.analysis_request.is_some());
    assert!(fx.analyzer.excerpts()[0].contains("12 passed"));

    // WHEN: the analyzer answers (idle by default)
    fx.analyzer.release(1);
    wait_for("idle", || {
        registry
            .get(session.id)
            .is_some_and(|s| s.attention == AttentionState::Idle && s.analysis_request.is_none())
    })
    .await;

    // THEN: the unchanged screen is not sent again
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(fx.analyzer.calls(), 1);

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_typing_holds_off_escalation() -> Result<()> {
    let (_dir, project) = project()?;
    let fx = fixture(&project, FakeAnalyzer::new())?;
    let session = fx.engine.create_terminal_pane("scratch").await?;
    fx.mux.set_screen(&session.pane_handle, PROMPT_SCREEN);

    // Keep typing for a while; no analyzer call may happen meanwhile
    for _ in 0..15 {
        fx.engine.note_user_input(session.id);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(fx.analyzer.calls(), 0);
    assert_ne!(
        fx.engine.registry().get(session.id).unwrap().attention,
        AttentionState::Analyzing
    );

    // Once the grace window passes, the still screen is classified
    let analyzer = fx.analyzer.clone();
    wait_for("analyzer call after typing stops", || analyzer.calls() == 1).await;

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_waiting_verdict_carries_the_question() -> Result<()> {
    let (_dir, project) = project()?;
    let prompt = WaitingPrompt {
        question: Some("Apply the migration?".to_string()),
        options: vec![OptionChoice {
            action: "Yes".to_string(),
            keys: vec!["1".to_string()],
        }],
        potential_harm: None,
    };
    let analyzer = FakeAnalyzer::new().with_response(Ok(AnalysisVerdict::waiting(prompt.clone())));
    let fx = fixture(&project, analyzer)?;
    let session = fx.engine.create_terminal_pane("migrate").await?;
    fx.mux.set_screen(&session.pane_handle, "Apply the migration?\n1. Yes\n2. No");

    let registry = fx.engine.registry().clone();
    wait_for("waiting", || {
        registry
            .get(session.id)
            .is_some_and(|s| s.attention == AttentionState::Waiting)
    })
    .await;
    assert_eq!(registry.get(session.id).unwrap().waiting_prompt, Some(prompt));
    // Autopilot is off, so nothing was typed into the pane
    assert!(fx.mux.sent_keys().is_empty());

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_analyzer_failure_settles_idle_with_error() -> Result<()> {
    let (_dir, project) = project()?;
    let analyzer = FakeAnalyzer::new().with_response(Err(AnalyzerError::Timeout));
    let fx = fixture(&project, analyzer)?;
    let session = fx.engine.create_terminal_pane("flaky").await?;
    fx.mux.set_screen(&session.pane_handle, PROMPT_SCREEN);

    let registry = fx.engine.registry().clone();
    wait_for("analyzer error recorded", || {
        registry
            .get(session.id)
            .is_some_and(|s| s.analyzer_error.is_some())
    })
    .await;
    let settled = registry.get(session.id).unwrap();
    assert_eq!(settled.attention, AttentionState::Idle);
    assert!(settled.analysis_request.is_none());

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_new_output_supersedes_pending_analysis() -> Result<()> {
    let (_dir, project) = project()?;
    let fx = fixture(&project, FakeAnalyzer::held())?;
    let session = fx.engine.create_terminal_pane("builder").await?;
    let handle = session.pane_handle.clone();
    fx.mux.set_screen(&handle, PROMPT_SCREEN);

    let registry = fx.engine.registry().clone();
    wait_for("analyzing", || {
        registry
            .get(session.id)
            .is_some_and(|s| s.attention == AttentionState::Analyzing)
    })
    .await;

    // The pane prints again before the analyzer answers
    fx.mux.set_screen(&handle, &format!("{PROMPT_SCREEN}\n$ cargo build"));
    wait_for("working", || {
        registry
            .get(session.id)
            .is_some_and(|s| s.attention == AttentionState::Working)
    })
    .await;
    assert!(registry.get(session.id).unwrap().analysis_request.is_none());

    // The screen settles again, so a second request goes out
    let analyzer = fx.analyzer.clone();
    wait_for("second escalation", || analyzer.calls() == 2).await;
    let second = registry.get(session.id).unwrap().analysis_request;
    assert!(second.is_some());

    // The first call now answers "waiting" for a request nobody holds any more
    fx.analyzer.push(Ok(AnalysisVerdict::waiting(WaitingPrompt {
        question: Some("stale".to_string()),
        ..WaitingPrompt::default()
    })));
    fx.analyzer.release(1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_stale = registry.get(session.id).unwrap();
    assert_eq!(after_stale.attention, AttentionState::Analyzing);
    assert_eq!(after_stale.analysis_request, second);
    assert_eq!(after_stale.waiting_prompt, None);

    // The current request resolves normally
    fx.analyzer.release(1);
    wait_for("idle", || {
        registry
            .get(session.id)
            .is_some_and(|s| s.attention == AttentionState::Idle)
    })
    .await;

    fx.engine.shutdown().await?;
    Ok(())
}
