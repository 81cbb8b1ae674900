//! CLI argument parsing for issue-triage.
//!
//! CLI flags override every other configuration source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Issue triage with persistent duplicate memory
#[derive(Parser, Debug)]
#[command(name = "issue-triage")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/issue-triage/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override the issue store directory
    #[arg(long, global = true)]
    pub store_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Triage one issue: duplicate check, classify, remember, label
    Triage {
        /// JSON file holding the issue ({"repo", "number", "title", "body", "labels"})
        #[arg(long)]
        issue_file: PathBuf,
    },

    /// Triage every issue in a JSON array file
    RetriageAll {
        #[arg(long)]
        issues_file: PathBuf,
    },

    /// Store an issue in memory without labeling it
    Store {
        /// Repository identifier (owner/name)
        repo: String,
        number: u64,
        title: String,
        body: Option<String>,

        /// Comma-separated labels
        #[arg(long, value_delimiter = ',')]
        labels: Vec<String>,

        /// P0-P3
        #[arg(long)]
        priority: Option<String>,
    },

    /// Find stored issues similar to some text
    Search {
        text: String,

        /// Minimum similarity (default from config)
        #[arg(long)]
        threshold: Option<f32>,

        #[arg(long)]
        max_results: Option<usize>,

        #[arg(long)]
        max_age_days: Option<u32>,

        /// Only match issues from this repository
        #[arg(long)]
        repo: Option<String>,
    },

    /// Classify an issue by keywords (exit code 1 when no label matches)
    Classify {
        title: String,
        body: Option<String>,
    },

    /// Show store statistics
    Stats,
}
