//! Command-line definitions for the `tokenwise` binary.

pub(crate) mod budget;
pub(crate) mod cache;
pub(crate) mod strategy;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use tokenwise::budget::Priority;

#[derive(Parser)]
#[command(name = "tokenwise")]
#[command(version)]
#[command(about = "Response cache and token budget engine for AI coding assistants")]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.tokenwise/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Inspect and manage the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Inspect cache admission strategies
    Strategy {
        #[command(subcommand)]
        action: StrategyAction,
    },
    /// Token budget planning
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Show entry counts, hit totals and tokens saved
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up a cached response
    Lookup {
        prompt: String,
        #[arg(long, default_value = "")]
        context: String,
        /// Restrict approximate matches to entries sharing these tags
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Cache a response
    Store {
        prompt: String,
        response: String,
        #[arg(long, default_value = "")]
        context: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Tokens saved per hit (estimated from the response if omitted)
        #[arg(long)]
        tokens: Option<u32>,
    },
    /// Remove every entry
    Clear,
    /// Evict expired and over-capacity entries now
    Prune,
    /// Write entry metadata (previews only) as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub(crate) enum StrategyAction {
    /// List configured strategies
    List,
    /// Show which strategy would own a request
    Classify {
        text: String,
        #[arg(long, default_value = "")]
        context: String,
    },
}

#[derive(Subcommand)]
pub(crate) enum BudgetAction {
    /// Show the allowance a task would receive from a fresh pool
    Plan {
        /// Estimated complexity, 0-10
        #[arg(long, default_value_t = 5)]
        complexity: u8,
        #[arg(long, default_value = "normal")]
        priority: Priority,
    },
}
