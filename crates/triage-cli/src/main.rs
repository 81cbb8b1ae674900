//! issue-triage
//!
//! Triage GitHub-style issues with a persistent duplicate memory.
//!
//! # Usage
//!
//! ```bash
//! issue-triage triage --issue-file issue.json
//! issue-triage retriage-all --issues-file issues.json
//! issue-triage store acme/app 12 "App crashes" "Stack trace..." --labels bug --priority P1
//! issue-triage search "crash on submit" --threshold 0.85
//! issue-triage classify "App crashes on startup"
//! issue-triage stats
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/issue-triage/config.toml)
//! 3. `--config` file
//! 4. Environment variables (TRIAGE_*)
//! 5. CLI flags

use anyhow::Result;
use clap::Parser;

use triage_cli::{
    handle_classify, handle_retriage_all, handle_search, handle_stats, handle_store,
    handle_triage, init_logging, load_settings, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Triage { issue_file } => {
            handle_triage(&settings, &issue_file).await?;
        }
        Commands::RetriageAll { issues_file } => {
            handle_retriage_all(&settings, &issues_file).await?;
        }
        Commands::Store {
            repo,
            number,
            title,
            body,
            labels,
            priority,
        } => {
            handle_store(
                &settings,
                &repo,
                number,
                &title,
                body.as_deref(),
                labels,
                priority.as_deref(),
            )
            .await?;
        }
        Commands::Search {
            text,
            threshold,
            max_results,
            max_age_days,
            repo,
        } => {
            handle_search(&settings, &text, threshold, max_results, max_age_days, repo).await?;
        }
        Commands::Classify { title, body } => {
            if !handle_classify(&settings, &title, body.as_deref())? {
                std::process::exit(1);
            }
        }
        Commands::Stats => {
            handle_stats(&settings).await?;
        }
    }

    Ok(())
}
