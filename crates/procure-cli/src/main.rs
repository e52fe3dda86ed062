//! procure: watermark-driven categorization of procurement records.
//!
//! # Usage
//!
//! ```bash
//! procure categorize [--domain D]... [--from DATE --to DATE] [--top-k N]
//! procure embed [--domain D]...
//! procure status
//! procure admin stats
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/procure/config.toml)
//! 3. Environment variables (PROCURE_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use procure_cli::{
    handle_admin, init_logging, load_settings, run_categorize, run_embed, show_status,
    CategorizeArgs, Cli, Commands, GlobalOptions,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let globals = GlobalOptions {
        config: cli.config,
        log_level: cli.log_level,
        verbose: cli.verbose,
        trace: cli.trace,
    };

    match cli.command {
        Commands::Categorize {
            domains,
            from,
            to,
            top_k,
            batch_size,
            workers,
            max_inflight,
            db_path,
        } => {
            let settings = load_settings(&globals, db_path.as_deref())?;
            init_logging(&settings.log_level)?;
            run_categorize(
                settings,
                CategorizeArgs {
                    domains,
                    from,
                    to,
                    top_k,
                    batch_size,
                    workers,
                    max_inflight,
                },
            )
            .await?;
        }
        Commands::Embed { domains, db_path } => {
            let settings = load_settings(&globals, db_path.as_deref())?;
            init_logging(&settings.log_level)?;
            run_embed(settings, domains).await?;
        }
        Commands::Status { domains, db_path } => {
            let settings = load_settings(&globals, db_path.as_deref())?;
            init_logging(&settings.log_level)?;
            show_status(settings, domains)?;
        }
        Commands::Admin { db_path, command } => {
            let settings = load_settings(&globals, db_path.as_deref())?;
            init_logging(&settings.log_level)?;
            handle_admin(settings, command)?;
        }
    }

    Ok(())
}
