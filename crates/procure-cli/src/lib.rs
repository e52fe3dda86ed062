//! procure CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (categorize, embed, status, admin)

pub mod cli;
pub mod commands;

pub use cli::{AdminCommands, Cli, Commands};
pub use commands::{
    effective_log_level, format_run_summary, handle_admin, init_logging, load_settings,
    run_categorize, run_embed, show_status, CategorizeArgs, GlobalOptions,
};
