// ABOUTME: CLI argument parsing and command routing for panekeeper
//
// Provides command-line interface for:
// - Watching a project's panes (watch)
// - Listing persisted panes (list)
// - Merging or closing a pane (merge, close)
//
// `merge` and `close` act on the persisted snapshot directly; run them while
// no `watch` is active for the same project.

pub mod close;
pub mod list;
pub mod merge;
pub mod util;
pub mod watch;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::models::Resolution;

/// Keep parallel coding-agent panes observable and merge their worktrees back
#[derive(Parser)]
#[command(name = "panekeeper")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Project directory (defaults to the git repository containing the current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,
}

/// Output format for commands
#[derive(Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile and monitor every pane until interrupted
    Watch,

    /// List persisted panes
    List(ListArgs),

    /// Merge a pane's worktree branch into the main line
    Merge(MergeArgs),

    /// Close a pane without merging
    Close(CloseArgs),
}

/// Arguments for the list command
#[derive(clap::Args)]
pub struct ListArgs {
    /// Show only panes waiting on the user
    #[arg(long)]
    pub waiting: bool,
}

/// Arguments for the merge command
#[derive(clap::Args)]
pub struct MergeArgs {
    /// Pane id or name; omit with --all
    #[arg(required_unless_present = "all")]
    pub pane: Option<String>,

    /// Merge every pane with a worktree, deepest first
    #[arg(long, conflicts_with = "pane")]
    pub all: bool,

    /// How to handle an issue reported by the merge
    #[arg(long, value_enum)]
    pub resolve: Option<ResolutionArg>,
}

/// Arguments for the close command
#[derive(clap::Args)]
pub struct CloseArgs {
    /// Pane id or name
    pub pane: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ResolutionArg {
    ClosePane,
    CommitChanges,
    StashMain,
    AgentResolve,
    Manual,
    Cancel,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::ClosePane => Self::ClosePane,
            ResolutionArg::CommitChanges => Self::CommitChanges,
            ResolutionArg::StashMain => Self::StashMain,
            ResolutionArg::AgentResolve => Self::AgentResolve,
            ResolutionArg::Manual => Self::Manual,
            ResolutionArg::Cancel => Self::Cancel,
        }
    }
}
