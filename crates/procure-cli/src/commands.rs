//! Command implementations for procure.
//!
//! Handles:
//! - categorize: run the pipeline driver for each domain
//! - embed: backfill missing embeddings
//! - status: print stored watermarks
//! - admin: storage statistics and manual watermark changes

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use procure_categorize::{
    run_domains, BatchApplier, CategorizeWorker, CategoryIndex, EligibilitySelector,
    EmbeddingBackfill, OrchestratorConfig, ParallelBatchOrchestrator, PipelineDriver, RunMode,
    RunSummary, SimilarityScorer, WatermarkStore,
};
use procure_embeddings::{ApiEmbedder, ApiEmbedderConfig, RetryConfig, RetryingProvider};
use procure_storage::Storage;
use procure_types::{format_day, Settings};

use crate::cli::AdminCommands;

/// Options shared by every command.
#[derive(Debug, Default, Clone)]
pub struct GlobalOptions {
    pub config: Option<String>,
    pub log_level: Option<String>,
    pub verbose: bool,
    pub trace: bool,
}

/// Overrides accepted by `categorize`.
#[derive(Debug, Default, Clone)]
pub struct CategorizeArgs {
    pub domains: Vec<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub top_k: Option<usize>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub max_inflight: Option<usize>,
}

/// Load configuration (defaults -> file -> env) and apply CLI overrides.
pub fn load_settings(globals: &GlobalOptions, db_path: Option<&str>) -> Result<Settings> {
    let mut settings =
        Settings::load(globals.config.as_deref()).context("Failed to load configuration")?;

    if let Some(db_path) = db_path {
        settings.db_path = db_path.to_string();
    }
    settings.log_level = effective_log_level(&settings.log_level, globals);
    Ok(settings)
}

/// `--trace` beats `--verbose`, which beats `--log-level` and config.
pub fn effective_log_level(configured: &str, globals: &GlobalOptions) -> String {
    if globals.trace {
        "trace".to_string()
    } else if globals.verbose {
        "debug".to_string()
    } else if let Some(level) = &globals.log_level {
        level.clone()
    } else {
        configured.to_string()
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins when set.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path)
        .with_context(|| format!("Failed to open storage at {:?}", db_path))?;
    Ok(Arc::new(storage))
}

fn domains_or_default(domains: Vec<String>, settings: &Settings) -> Vec<String> {
    if domains.is_empty() {
        settings.domains.clone()
    } else {
        domains
    }
}

/// Cancellation token tripped by Ctrl+C or SIGTERM.
///
/// In-flight sub-batches finish; no new ones start and the interrupted day
/// does not advance its watermark.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, finishing in-flight work...");
            }
            _ = terminate => {
                info!("Received SIGTERM, finishing in-flight work...");
            }
        }
        trigger.cancel();
    });

    token
}

/// Human-readable lines for one run: one per day, then a total.
pub fn format_run_summary(summary: &RunSummary) -> Vec<String> {
    let mut lines = Vec::with_capacity(summary.days.len() + 1);
    for report in &summary.days {
        let o = &report.outcome;
        lines.push(format!(
            "[{}] {}: selected={} attempted={} updated={} skipped={} errors={}{}",
            summary.domain,
            format_day(report.day),
            o.selected,
            o.attempted,
            o.updated,
            o.skipped,
            o.errors,
            if report.advanced { " advanced" } else { "" }
        ));
    }

    let totals = summary.totals();
    let window = match summary.window {
        Some((start, end)) => format!("{}..{}", format_day(start), format_day(end)),
        None => "empty".to_string(),
    };
    let status = match summary.stopped {
        Some(reason) => format!("stopped: {}", reason),
        None => "completed".to_string(),
    };
    lines.push(format!(
        "[{}] window {} days={} attempted={} updated={} skipped={} errors={} watermark {} -> {} ({})",
        summary.domain,
        window,
        summary.days.len(),
        totals.attempted,
        totals.updated,
        totals.skipped,
        totals.errors,
        format_day(summary.watermark_before),
        format_day(summary.watermark_after),
        status
    ));
    lines
}

/// Run categorization for the requested domains.
///
/// Per-day errors are reported and leave the exit status at zero; errors
/// that invalidate a run (bad configuration, empty catalog, inverted range,
/// out-of-order watermarks) are returned.
pub async fn run_categorize(mut settings: Settings, args: CategorizeArgs) -> Result<Vec<RunSummary>> {
    if let Some(top_k) = args.top_k {
        settings.categorize.top_k = top_k;
    }
    if let Some(batch_size) = args.batch_size {
        settings.categorize.batch_size = batch_size;
    }
    if let Some(workers) = args.workers {
        settings.categorize.workers = workers;
    }
    if let Some(max_inflight) = args.max_inflight {
        settings.categorize.max_inflight = max_inflight;
    }
    settings
        .categorize
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid categorize settings")?;

    let mode = match (args.from, args.to) {
        (Some(from), Some(to)) => RunMode::Range { from, to },
        _ => RunMode::Daily,
    };
    let floor = settings.categorize.floor()?;
    let domains = domains_or_default(args.domains, &settings);

    info!(
        domains = ?domains,
        top_k = settings.categorize.top_k,
        batch_size = settings.categorize.batch_size,
        workers = settings.categorize.workers,
        max_inflight = settings.categorize.max_inflight,
        ?mode,
        "Starting categorization"
    );

    let storage = open_storage(&settings)?;
    let index = Arc::new(CategoryIndex::load(&storage).context("Failed to load category catalog")?);

    let worker = Arc::new(CategorizeWorker::new(
        SimilarityScorer::new(storage.clone(), index, settings.categorize.top_k),
        BatchApplier::new(storage.clone()),
    ));
    let orchestrator = Arc::new(ParallelBatchOrchestrator::new(OrchestratorConfig::from(
        &settings.categorize,
    )));

    let drivers: Vec<_> = domains
        .iter()
        .map(|domain| {
            PipelineDriver::new(
                domain.clone(),
                WatermarkStore::new(storage.clone(), floor),
                EligibilitySelector::new(storage.clone()),
                orchestrator.clone(),
                worker.clone(),
            )
        })
        .collect();

    let today = Utc::now().date_naive();
    let cancel = shutdown_token();
    let results = run_domains(&drivers, mode, today, &cancel).await;

    let mut summaries = Vec::with_capacity(results.len());
    let mut failed = Vec::new();
    for (driver, result) in drivers.iter().zip(results) {
        match result {
            Ok(summary) => {
                for line in format_run_summary(&summary) {
                    println!("{}", line);
                }
                summaries.push(summary);
            }
            Err(e) => {
                error!(domain = %driver.domain(), error = %e, "Run failed");
                eprintln!("[{}] run failed: {}", driver.domain(), e);
                failed.push(driver.domain().to_string());
            }
        }
    }

    storage.flush().context("Failed to flush storage")?;

    if !failed.is_empty() {
        anyhow::bail!("categorization failed for: {}", failed.join(", "));
    }
    Ok(summaries)
}

/// Backfill embeddings for the requested domains.
pub async fn run_embed(settings: Settings, domains: Vec<String>) -> Result<()> {
    let floor = settings.categorize.floor()?;
    let domains = domains_or_default(domains, &settings);

    let config = ApiEmbedderConfig::from_settings(&settings.embedding)?;
    let embedder = ApiEmbedder::new(config)?;
    let provider = Arc::new(RetryingProvider::new(
        embedder,
        RetryConfig {
            max_attempts: settings.embedding.max_retries.max(1),
            ..RetryConfig::default()
        },
    ));

    let storage = open_storage(&settings)?;
    let backfill = EmbeddingBackfill::new(
        storage.clone(),
        provider,
        WatermarkStore::new(storage.clone(), floor),
        settings.embedding.concurrency,
    );

    let today = Utc::now().date_naive();
    let cancel = shutdown_token();
    for domain in &domains {
        let summary = backfill
            .run(domain, today, &cancel)
            .await
            .with_context(|| format!("Embedding backfill failed for {}", domain))?;
        for day in &summary.days {
            println!(
                "[{}] {}: selected={} embedded={} skipped={} errors={}{}",
                domain,
                format_day(day.day),
                day.selected,
                day.embedded,
                day.skipped,
                day.errors,
                if day.advanced { " advanced" } else { "" }
            );
        }
        if summary.unstamped.selected > 0 {
            let u = &summary.unstamped;
            println!(
                "[{}] unstamped: selected={} embedded={} skipped={} errors={}",
                domain, u.selected, u.embedded, u.skipped, u.errors
            );
        }
        match summary.stopped {
            Some(reason) => println!("[{}] embedded={} (stopped: {})", domain, summary.embedded(), reason),
            None => println!("[{}] embedded={} (completed)", domain, summary.embedded()),
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    storage.flush().context("Failed to flush storage")?;
    Ok(())
}

/// Print stored watermarks per domain.
pub fn show_status(settings: Settings, domains: Vec<String>) -> Result<()> {
    let floor = settings.categorize.floor()?;
    let domains = domains_or_default(domains, &settings);
    let storage = open_storage(&settings)?;
    let watermarks = WatermarkStore::new(storage, floor);

    let show = |date: Option<NaiveDate>| date.map(format_day).unwrap_or_else(|| "-".to_string());

    println!("{:<16} {:>10} {:>10} {:>12}", "DOMAIN", "INGESTED", "EMBEDDED", "CATEGORIZED");
    for domain in &domains {
        let stored = watermarks.stored(domain);
        let order = match stored.check_order(domain) {
            Ok(()) => "",
            Err(_) => "  (out of order)",
        };
        println!(
            "{:<16} {:>10} {:>10} {:>12}{}",
            domain,
            show(stored.ingested),
            show(stored.embedded),
            show(stored.categorized),
            order
        );
    }
    Ok(())
}

/// Handle admin commands.
pub fn handle_admin(settings: Settings, command: AdminCommands) -> Result<()> {
    let floor = settings.categorize.floor()?;
    let storage = open_storage(&settings)?;

    match command {
        AdminCommands::Stats => {
            let stats = storage.get_stats().context("Failed to read storage stats")?;
            println!("Database: {}", settings.expanded_db_path().display());
            println!("  Watermarks:  {}", stats.watermark_count);
            println!("  Records:     {}", stats.record_count);
            println!("  Embeddings:  {}", stats.embedding_count);
            println!("  Results:     {}", stats.result_count);
            println!("  Categories:  {}", stats.category_count);
            println!("  Disk usage:  {} bytes", stats.disk_usage_bytes);
        }
        AdminCommands::SetWatermark {
            domain,
            stage,
            date,
        } => {
            let watermarks = WatermarkStore::new(storage.clone(), floor);
            if !watermarks.set(&domain, stage, date) {
                anyhow::bail!("Failed to write {} watermark for {}", stage, domain);
            }
            let stored = watermarks.stored(&domain);
            if let Err(e) = stored.check_order(&domain) {
                warn!(error = %e, "Watermarks are now out of order");
                eprintln!("warning: {}", e);
            }
            println!("{} {} watermark set to {}", domain, stage, format_day(date));
        }
    }

    storage.flush().context("Failed to flush storage")?;
    Ok(())
}
