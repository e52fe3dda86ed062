//! CLI argument parsing for procure.
//!
//! CLI flags override every other configuration source.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use procure_types::{parse_day, Stage};

/// Procurement categorization engine
///
/// Assigns catalog categories to procurement records one day at a time,
/// driven by per-domain watermarks.
#[derive(Parser, Debug)]
#[command(name = "procure")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/procure/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Trace-level logging
    #[arg(long, global = true)]
    pub trace: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Categorize pending records (daily mode unless --from/--to are given)
    Categorize {
        /// Domain to process (repeatable; default from config)
        #[arg(short, long = "domain")]
        domains: Vec<String>,

        /// First day of an explicit range (YYYYMMDD or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg, requires = "to")]
        from: Option<NaiveDate>,

        /// Last day of an explicit range (YYYYMMDD or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg, requires = "from")]
        to: Option<NaiveDate>,

        /// Categories assigned per record
        #[arg(long)]
        top_k: Option<usize>,

        /// Record IDs per sub-batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Concurrent workers
        #[arg(long)]
        workers: Option<usize>,

        /// Sub-batches submitted before draining completions
        #[arg(long)]
        max_inflight: Option<usize>,

        /// Override database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Generate missing embeddings and advance the embedded watermark
    Embed {
        /// Domain to process (repeatable; default from config)
        #[arg(short, long = "domain")]
        domains: Vec<String>,

        /// Override database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Show watermarks per domain
    Status {
        /// Domain to show (repeatable; default from config)
        #[arg(short, long = "domain")]
        domains: Vec<String>,

        /// Override database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Administrative commands
    Admin {
        /// Database path (default from config)
        #[arg(long)]
        db_path: Option<String>,

        #[command(subcommand)]
        command: AdminCommands,
    },
}

/// Admin subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum AdminCommands {
    /// Show database statistics
    Stats,

    /// Overwrite a watermark (for backfills and recovery)
    SetWatermark {
        /// Domain the watermark belongs to
        #[arg(long)]
        domain: String,

        /// Stage: ingested, embedded or categorized
        #[arg(long)]
        stage: Stage,

        /// New watermark day (YYYYMMDD or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date_arg)]
        date: NaiveDate,
    },
}

fn parse_date_arg(s: &str) -> Result<NaiveDate, String> {
    parse_day(s).map_err(|e| e.to_string())
}
