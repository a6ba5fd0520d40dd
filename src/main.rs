// ABOUTME: Main entry point for panekeeper
//
// Binary: panekeeper
// Usage: panekeeper <COMMAND>
// - watch: reconcile and monitor every pane of the project until ctrl-c
// - list: show persisted panes
// - merge: merge a pane's worktree back (or --all, deepest first)
// - close: drop a pane without merging

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;
use std::path::Path;

use panekeeper::cli::{self, Commands};
use panekeeper::config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config = AppConfig::load()?;

    setup_logging(&config.log_dir());
    setup_panic_handler();

    let project = args.project.as_deref();
    match &args.command {
        Commands::Watch => cli::watch::execute(&config, project).await,
        Commands::List(list_args) => cli::list::execute(list_args, args.format, &config, project),
        Commands::Merge(merge_args) => {
            cli::merge::execute(merge_args, args.format, &config, project).await
        }
        Commands::Close(close_args) => cli::close::execute(close_args, &config, project).await,
    }
}

fn setup_logging(log_dir: &Path) {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;

    let _ = std::fs::create_dir_all(log_dir);

    // Create JSONL log file with timestamp
    let log_file = log_dir.join(format!(
        "panekeeper-{}.jsonl",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    let file = match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Logging disabled: cannot open {}: {}", log_file.display(), e);
            return;
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()             // Output in JSON Lines format
                .with_target(true)  // Include target module in JSON
                .with_writer(file)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "panekeeper=info".into()),
        )
        .init();
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
