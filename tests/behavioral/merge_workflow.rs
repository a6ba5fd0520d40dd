// ABOUTME: Behavioral tests for the two-phase merge against real git repositories
//
// Panes are created through the engine (real worktrees, fake tmux), work is
// committed inside the worktree, and the merge is driven end to end.

use anyhow::Result;
use panekeeper::agents::AgentKind;
use panekeeper::app::EngineError;
use panekeeper::merge::{BatchResult, IssueOutcome, MergeError, MergeOutcome};
use panekeeper::models::{MergeIssue, Resolution, Session, WorkspaceBinding};
use panekeeper::store::SnapshotStore;
use panekeeper::testing::FakeAnalyzer;
use pretty_assertions::assert_eq;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::fixtures::{engine_for, git, ScriptedAgent, TestRepo};

#[tokio::test]
async fn test_conflict_reports_files_and_leaves_both_sides_untouched() -> Result<()> {
    // GIVEN: main and a pane's branch both changed src/a.ts
    let repo = TestRepo::new()?;
    repo.add_commit("src/a.ts", "export const a = 1;\n", "Add a")?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;

    let session = fx
        .engine
        .create_pane("tweak a constant", Some(AgentKind::Claude), Some(false))
        .await?;
    let worktree = session.workspace.clone().unwrap().path;
    TestRepo::commit_file(&worktree, "src/a.ts", "export const a = 2;\n", "Use 2")?;
    repo.add_commit("src/a.ts", "export const a = 3;\n", "Use 3")?;

    let main_before = repo.read("src/a.ts")?;
    let main_head = git(repo.path(), &["rev-parse", "HEAD"])?;
    let branch_head = git(&worktree, &["rev-parse", "HEAD"])?;

    // WHEN: merging
    let outcome = fx.engine.request_merge(session.id).await?;

    // THEN: exactly that file is reported
    assert_eq!(
        outcome,
        MergeOutcome::Issue(MergeIssue::MergeConflict {
            files: vec![PathBuf::from("src/a.ts")]
        })
    );

    // THEN: main is byte-identical and the branch is back at its pre-attempt head, clean
    assert_eq!(repo.read("src/a.ts")?, main_before);
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"])?, main_head);
    assert_eq!(git(&worktree, &["rev-parse", "HEAD"])?, branch_head);
    assert_eq!(git(&worktree, &["status", "--porcelain"])?, "");
    assert!(git(&worktree, &["rev-parse", "-q", "--verify", "MERGE_HEAD"]).is_err());

    // THEN: the pane is still registered and its worktree kept
    assert!(fx.engine.registry().contains(session.id));
    assert!(worktree.exists());

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_clean_merge_retires_pane_worktree_and_branch() -> Result<()> {
    // GIVEN: a pane with uncommitted work in its worktree
    let repo = TestRepo::new()?;
    let main = repo.current_branch()?;
    let fx = engine_for(
        repo.path(),
        ScriptedAgent::replying("feat: add greeting"),
        FakeAnalyzer::new(),
    )?;

    let session = fx
        .engine
        .create_pane("add greeting", Some(AgentKind::Claude), Some(false))
        .await?;
    let workspace = session.workspace.clone().unwrap();
    assert_eq!(workspace.branch, "add-greeting");
    std::fs::write(workspace.path.join("hello.txt"), "hi\n")?;

    // WHEN: merging
    let outcome = fx.engine.request_merge(session.id).await?;

    // THEN: the work landed on main under the agent's commit message
    let MergeOutcome::Merged { session: merged, into } = outcome else {
        panic!("expected a merge, got {outcome:?}");
    };
    assert_eq!(merged.id, session.id);
    assert_eq!(into, main);
    assert_eq!(repo.read("hello.txt")?, b"hi\n");
    assert_eq!(git(repo.path(), &["log", "-1", "--format=%s"])?, "feat: add greeting");
    assert_eq!(fx.agent.prompts().len(), 1);
    assert_eq!(git(repo.path(), &["status", "--porcelain"])?, "");

    // THEN: session, worktree, branch and tmux pane are gone, and the snapshot agrees
    assert!(!fx.engine.registry().contains(session.id));
    assert!(!workspace.path.exists());
    assert!(!repo.branch_exists("add-greeting")?);
    assert!(fx.mux.pane(&session.pane_handle).is_none());
    assert!(!fx.engine.is_monitoring(session.id));
    let saved = SnapshotStore::new(fx.engine.snapshot_path()).load()?.unwrap();
    assert!(saved.panes.is_empty());

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_branch_without_new_commits_has_nothing_to_merge() -> Result<()> {
    let repo = TestRepo::new()?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;
    let session = fx
        .engine
        .create_pane("idle pane", Some(AgentKind::Codex), None)
        .await?;

    let outcome = fx.engine.request_merge(session.id).await?;
    assert_eq!(outcome, MergeOutcome::Issue(MergeIssue::NothingToMerge));

    // Closing is the offered way out; the branch has nothing unmerged so it is deleted
    let resolved = fx
        .engine
        .resolve_issue(session.id, &MergeIssue::NothingToMerge, Resolution::ClosePane)
        .await?;
    assert!(matches!(resolved, IssueOutcome::Closed { branch_deleted: true, .. }));
    assert!(!repo.branch_exists("idle-pane")?);
    assert!(fx.engine.sessions().is_empty());

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_dirty_main_is_stashed_then_merged() -> Result<()> {
    let repo = TestRepo::new()?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;
    let session = fx
        .engine
        .create_pane("docs", Some(AgentKind::Claude), Some(false))
        .await?;
    let worktree = session.workspace.clone().unwrap().path;
    TestRepo::commit_file(&worktree, "docs/guide.md", "# Guide\n", "Add guide")?;
    std::fs::write(repo.path().join("README.md"), "# Edited locally\n")?;

    let outcome = fx.engine.request_merge(session.id).await?;
    let MergeOutcome::Issue(issue) = outcome else {
        panic!("expected main-dirty, got {outcome:?}");
    };
    assert_eq!(
        issue,
        MergeIssue::MainDirty {
            files: vec!["README.md".to_string()]
        }
    );

    let resolved = fx
        .engine
        .resolve_issue(session.id, &issue, Resolution::StashMain)
        .await?;
    assert!(matches!(
        resolved,
        IssueOutcome::Retried(MergeOutcome::Merged { .. })
    ));
    assert_eq!(repo.read("docs/guide.md")?, b"# Guide\n");
    assert_eq!(repo.read("README.md")?, b"# Test Repo\n");
    assert!(!git(repo.path(), &["stash", "list"])?.is_empty());

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_manual_conflict_resolution_then_merge_again() -> Result<()> {
    let repo = TestRepo::new()?;
    repo.add_commit("src/a.ts", "one\n", "Add a")?;
    let main = repo.current_branch()?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;

    let session = fx
        .engine
        .create_pane("rework a", Some(AgentKind::Claude), Some(false))
        .await?;
    let worktree = session.workspace.clone().unwrap().path;
    TestRepo::commit_file(&worktree, "src/a.ts", "two\n", "Branch side")?;
    repo.add_commit("src/a.ts", "three\n", "Main side")?;

    let MergeOutcome::Issue(issue) = fx.engine.request_merge(session.id).await? else {
        panic!("expected a conflict");
    };
    let instructions = fx
        .engine
        .resolve_issue(session.id, &issue, Resolution::Manual)
        .await?;
    assert!(matches!(&instructions, IssueOutcome::AwaitingUser(text) if text.contains(&main)));

    // The user resolves inside the worktree the way the instructions say
    let _ = git(&worktree, &["merge", &main]);
    std::fs::write(worktree.join("src/a.ts"), "two and three\n")?;
    git(&worktree, &["add", "src/a.ts"])?;
    git(&worktree, &["commit", "--no-edit"])?;

    let outcome = fx.engine.request_merge(session.id).await?;
    assert!(matches!(outcome, MergeOutcome::Merged { .. }));
    assert_eq!(repo.read("src/a.ts")?, b"two and three\n");

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_merge_all_reports_each_pane() -> Result<()> {
    let repo = TestRepo::new()?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;

    let ready = fx
        .engine
        .create_pane("ready work", Some(AgentKind::Claude), Some(false))
        .await?;
    let ready_path = ready.workspace.clone().unwrap().path;
    TestRepo::commit_file(&ready_path, "ready.txt", "done\n", "Ready")?;

    let idle = fx
        .engine
        .create_pane("idle work", Some(AgentKind::Claude), Some(false))
        .await?;

    let ids: Vec<_> = fx.engine.sessions().iter().map(|s| s.id).collect();
    let results = fx.engine.merge_many(&ids).await;

    assert_eq!(results.len(), 2);
    let by_id = |id| results.iter().find(|(i, _)| *i == id).map(|(_, r)| r.clone());
    assert!(matches!(by_id(ready.id), Some(BatchResult::Merged(_))));
    assert_eq!(
        by_id(idle.id),
        Some(BatchResult::Issue(MergeIssue::NothingToMerge))
    );
    assert_eq!(repo.read("ready.txt")?, b"done\n");

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_retry_with_unresolved_conflict_commits_nothing() -> Result<()> {
    // GIVEN: a conflicting pane
    let repo = TestRepo::new()?;
    repo.add_commit("src/a.ts", "one\n", "Add a")?;
    let main = repo.current_branch()?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;

    let session = fx
        .engine
        .create_pane("rework a", Some(AgentKind::Claude), Some(false))
        .await?;
    let worktree = session.workspace.clone().unwrap().path;
    TestRepo::commit_file(&worktree, "src/a.ts", "two\n", "Branch side")?;
    repo.add_commit("src/a.ts", "three\n", "Main side")?;
    let first = fx.engine.request_merge(session.id).await?;
    assert!(matches!(
        first,
        MergeOutcome::Issue(MergeIssue::MergeConflict { .. })
    ));

    // The user starts the merge by hand but has not resolved it yet
    assert!(git(&worktree, &["merge", &main]).is_err());
    let main_head = git(repo.path(), &["rev-parse", "HEAD"])?;
    let branch_head = git(&worktree, &["rev-parse", "HEAD"])?;

    // WHEN: merging again
    let outcome = fx.engine.request_merge(session.id).await?;

    // THEN: the conflict is reported again and nothing was committed anywhere
    assert_eq!(
        outcome,
        MergeOutcome::Issue(MergeIssue::MergeConflict {
            files: vec![PathBuf::from("src/a.ts")]
        })
    );
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"])?, main_head);
    assert_eq!(repo.read("src/a.ts")?, b"three\n");
    assert_eq!(git(&worktree, &["rev-parse", "HEAD"])?, branch_head);
    assert!(worktree.exists());
    assert!(fx.engine.registry().contains(session.id));

    // Once resolved and committed, the same call goes through
    std::fs::write(worktree.join("src/a.ts"), "two and three\n")?;
    git(&worktree, &["add", "src/a.ts"])?;
    git(&worktree, &["commit", "--no-edit"])?;
    assert!(matches!(
        fx.engine.request_merge(session.id).await?,
        MergeOutcome::Merged { .. }
    ));
    assert_eq!(repo.read("src/a.ts")?, b"two and three\n");

    fx.engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_parent_is_skipped_when_nested_child_conflicts() -> Result<()> {
    // GIVEN: a parent pane and a child worktree created inside the parent's
    // worktree, branched from the parent's branch
    let repo = TestRepo::new()?;
    repo.add_commit("src/a.ts", "one\n", "Add a")?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;

    let parent = fx
        .engine
        .create_pane("parent work", Some(AgentKind::Claude), Some(false))
        .await?;
    let parent_ws = parent.workspace.clone().unwrap();
    TestRepo::commit_file(&parent_ws.path, "parent.txt", "p\n", "Parent work")?;

    let child_path = parent_ws.path.join(".panekeeper/worktrees/child-work");
    let child_arg = child_path.to_string_lossy().to_string();
    git(&parent_ws.path, &["worktree", "add", "-b", "child-work", &child_arg])?;
    TestRepo::commit_file(&child_path, "src/a.ts", "child\n", "Child side")?;
    TestRepo::commit_file(&parent_ws.path, "src/a.ts", "parent\n", "Parent side")?;

    let child = Session::new("child-work", "%7")
        .with_project_tag("webapp")
        .with_workspace(WorkspaceBinding {
            path: child_path.clone(),
            project_root: parent_ws.path.clone(),
            branch: "child-work".to_string(),
        });
    fx.engine.registry().insert(child.clone());
    let parent_head = git(&parent_ws.path, &["rev-parse", "HEAD"])?;
    let main_head = git(repo.path(), &["rev-parse", "HEAD"])?;

    // WHEN: merging both, listed parent first
    let results = fx.engine.merge_many(&[parent.id, child.id]).await;

    // THEN: the child is tried first and conflicts; the parent is not attempted
    assert_eq!(
        results,
        vec![
            (
                child.id,
                BatchResult::Issue(MergeIssue::MergeConflict {
                    files: vec![PathBuf::from("src/a.ts")]
                })
            ),
            (parent.id, BatchResult::Skipped { blocked_by: child.id }),
        ]
    );
    assert_eq!(git(&parent_ws.path, &["rev-parse", "HEAD"])?, parent_head);
    assert_eq!(git(repo.path(), &["rev-parse", "HEAD"])?, main_head);
    assert!(fx.engine.registry().contains(parent.id));
    assert!(fx.engine.registry().contains(child.id));

    fx.engine.shutdown().await?;
    Ok(())
}

/// Install a post-merge hook that, the first time a merge completes on
/// `branch`, commits `content` to `file` on the main checkout
fn move_main_after_merge_on(repo: &TestRepo, branch: &str, file: &str, content: &str) -> Result<()> {
    let hook = repo.path().join(".git/hooks/post-merge");
    let marker = repo.dir.path().join("hook-ran");
    let script = format!(
        "#!/bin/sh\n\
         unset GIT_DIR GIT_WORK_TREE GIT_INDEX_FILE\n\
         [ \"$(git rev-parse --abbrev-ref HEAD)\" = \"{branch}\" ] || exit 0\n\
         [ -e \"{marker}\" ] && exit 0\n\
         touch \"{marker}\"\n\
         cd \"{main}\" || exit 1\n\
         printf '{content}' > {file}\n\
         git commit -q --no-gpg-sign -am 'Main moves during merge'\n",
        marker = marker.display(),
        main = repo.path().display(),
    );
    std::fs::create_dir_all(hook.parent().unwrap_or(Path::new(".")))?;
    std::fs::write(&hook, script)?;
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[tokio::test]
async fn test_conflict_in_second_phase_is_fatal_and_keeps_everything() -> Result<()> {
    // GIVEN: main moves on src/a.ts right after the first phase merged into the branch
    let repo = TestRepo::new()?;
    repo.add_commit("src/a.ts", "one\n", "Add a")?;
    let fx = engine_for(repo.path(), ScriptedAgent::unavailable(), FakeAnalyzer::new())?;

    let session = fx
        .engine
        .create_pane("race main", Some(AgentKind::Claude), Some(false))
        .await?;
    let worktree = session.workspace.clone().unwrap().path;
    TestRepo::commit_file(&worktree, "src/a.ts", "two\n", "Branch side")?;
    // An unrelated main commit so the first phase makes a real merge
    repo.add_commit("notes.txt", "n\n", "Unrelated")?;
    move_main_after_merge_on(&repo, "race-main", "src/a.ts", "main again\\n")?;

    // WHEN: merging
    let result = fx.engine.request_merge(session.id).await;

    // THEN: the second phase conflict is fatal and names the file
    match result {
        Err(EngineError::Merge(MergeError::Phase2Conflict { files })) => {
            assert_eq!(files, vec![PathBuf::from("src/a.ts")]);
        }
        other => panic!("expected a second phase conflict, got {other:?}"),
    }

    // THEN: main holds the commit from the hook, clean and not mid-merge
    assert_eq!(
        git(repo.path(), &["log", "-1", "--format=%s"])?,
        "Main moves during merge"
    );
    assert_eq!(repo.read("src/a.ts")?, b"main again\n");
    assert_eq!(git(repo.path(), &["status", "--porcelain"])?, "");
    assert!(git(repo.path(), &["rev-parse", "-q", "--verify", "MERGE_HEAD"]).is_err());

    // THEN: the pane, its worktree and its branch are kept
    assert!(fx.engine.registry().contains(session.id));
    assert!(worktree.exists());
    assert!(repo.branch_exists("race-main")?);

    fx.engine.shutdown().await?;
    Ok(())
}
