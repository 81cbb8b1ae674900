//! issue-triage CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations
//! - `io`: JSON-file issue source and stdout sink

pub mod cli;
pub mod commands;
pub mod io;

pub use cli::{Cli, Commands};
pub use commands::{
    handle_classify, handle_retriage_all, handle_search, handle_stats, handle_store,
    handle_triage, init_logging, load_settings,
};
pub use io::{JsonFileIssueSource, StdoutIssueSink};
