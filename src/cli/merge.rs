// ABOUTME: CLI merge command - run the two-phase merge for one pane or all of them

use super::{util, MergeArgs, OutputFormat};
use crate::config::AppConfig;
use crate::merge::{BatchResult, IssueOutcome, MergeOutcome};
use crate::models::{MergeIssue, PaneId};
use anyhow::Result;
use serde_json::json;
use std::path::Path;

pub async fn execute(
    args: &MergeArgs,
    format: OutputFormat,
    config: &AppConfig,
    project: Option<&Path>,
) -> Result<()> {
    let engine = util::open_engine(config, project)?;

    if args.all {
        let ids: Vec<PaneId> = engine.sessions().iter().map(|s| s.id).collect();
        let results = engine.merge_many(&ids).await;
        match format {
            OutputFormat::Json => {
                let rows: Vec<_> = results
                    .iter()
                    .map(|(id, r)| json!({ "id": id, "result": describe_batch(r) }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
            OutputFormat::Text => {
                for (id, result) in &results {
                    println!("{}  {}", id.short(), describe_batch(result));
                }
            }
        }
        return Ok(());
    }

    let target = args.pane.as_deref().unwrap_or_default();
    let session = util::find_session(target, &engine.sessions())?;
    let outcome = engine.request_merge(session.id).await?;

    let message = match (&outcome, args.resolve) {
        (MergeOutcome::Merged { into, .. }, _) => format!("Merged {} into {}", session.slug, into),
        (MergeOutcome::Issue(issue), Some(resolution)) => {
            let resolved = engine
                .resolve_issue(session.id, issue, resolution.into())
                .await?;
            describe_issue_outcome(&resolved)
        }
        (MergeOutcome::Issue(issue), None) => describe_issue(issue),
    };

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "id": session.id, "result": message }))?
        ),
        OutputFormat::Text => println!("{message}"),
    }
    Ok(())
}

fn describe_issue(issue: &MergeIssue) -> String {
    let options: Vec<String> = issue
        .resolutions()
        .iter()
        .map(|r| format!("{r:?}"))
        .collect();
    format!(
        "Not merged: {issue}. Re-run with --resolve <{}>",
        options.join("|")
    )
}

fn describe_issue_outcome(outcome: &IssueOutcome) -> String {
    match outcome {
        IssueOutcome::Retried(MergeOutcome::Merged { session, into }) => {
            format!("Merged {} into {}", session.slug, into)
        }
        IssueOutcome::Retried(MergeOutcome::Issue(issue)) => describe_issue(issue),
        IssueOutcome::Closed {
            session,
            branch_deleted,
        } => {
            let branch = if *branch_deleted { "branch deleted" } else { "branch kept" };
            format!("Closed {} ({branch})", session.slug)
        }
        IssueOutcome::AwaitingUser(instructions) => instructions.clone(),
        IssueOutcome::Cancelled => "Cancelled".to_string(),
    }
}

fn describe_batch(result: &BatchResult) -> String {
    match result {
        BatchResult::Merged(session) => format!("merged {}", session.slug),
        BatchResult::Issue(issue) => format!("not merged: {issue}"),
        BatchResult::Failed(error) => format!("failed: {error}"),
        BatchResult::Skipped { blocked_by } => {
            format!("skipped until {} merges", blocked_by.short())
        }
    }
}
