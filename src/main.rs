//! Listing Crawler main entry point
//!
//! This is the command-line interface for the sharded listing crawler.

use anyhow::{bail, Context};
use clap::Parser;
use listing_crawler::config::{load_config_with_hash, Config, CrawlKind};
use listing_crawler::output::{load_statistics, print_run_summary, print_statistics};
use listing_crawler::session::HttpEngine;
use listing_crawler::storage::open_storage;
use listing_crawler::Orchestrator;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Listing Crawler: resumable, sharded collection of classifieds listings
///
/// Runs one configured crawl pass with a fixed number of isolated sessions,
/// checkpointing progress so an interrupted run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "listing-crawler")]
#[command(version = "1.0.0")]
#[command(about = "A resumable, sharded listing crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Name of the crawl to run (defaults to the first configured crawl)
    #[arg(long, value_name = "NAME")]
    crawl: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Skip units already in the checkpoint, overriding the config
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Ignore the checkpoint and visit the whole frontier again
    #[arg(long, conflicts_with = "resume")]
    fresh: bool,

    /// Validate config and show the planned work without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.stats {
        handle_stats(&config)?;
        return Ok(0);
    }

    let crawl_name = match &cli.crawl {
        Some(name) => name.clone(),
        None => match config.crawls.first() {
            Some(crawl) => crawl.name.clone(),
            None => bail!("Configuration defines no [[crawl]] entries"),
        },
    };

    let resume = if cli.fresh {
        false
    } else if cli.resume {
        true
    } else {
        config.orchestrator.resume_from_checkpoint
    };

    let engine = Arc::new(HttpEngine::new(&config.session));
    let mut orchestrator = Orchestrator::new(config.clone(), &crawl_name, engine)?
        .with_config_hash(config_hash)
        .with_resume(resume);

    if cli.dry_run {
        handle_dry_run(&config, &orchestrator, resume)?;
        return Ok(0);
    }

    handle_crawl(&mut orchestrator).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("listing_crawler=info,warn"),
            1 => EnvFilter::new("listing_crawler=debug,info"),
            2 => EnvFilter::new("listing_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows what would be crawled
fn handle_dry_run(config: &Config, orchestrator: &Orchestrator, resume: bool) -> anyhow::Result<()> {
    println!("=== Listing Crawler Dry Run ===\n");

    println!("Orchestrator:");
    println!("  Workers: {}", config.orchestrator.worker_count);
    println!("  Flush interval: {} records", config.orchestrator.flush_interval);
    println!(
        "  Request delay: {:.1}s - {:.1}s",
        config.orchestrator.request_delay_range.min, config.orchestrator.request_delay_range.max
    );
    println!("  Resume from checkpoint: {}", resume);
    println!(
        "  Session open attempts: {}",
        config.orchestrator.session_open_attempts
    );

    println!("\nSession:");
    println!("  Page timeout: {}s", config.session.page_timeout);
    if let Some(agent) = &config.session.user_agent {
        println!("  User agent: {}", agent);
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);
    println!("  Partials: {}", config.output.partials_dir);

    println!("\nCrawls ({}):", config.crawls.len());
    for crawl in &config.crawls {
        println!("  - {} ({})", crawl.name, crawl.kind.as_str());
    }

    let crawl = orchestrator.crawl();
    println!("\n✓ Configuration is valid");
    match crawl.kind {
        CrawlKind::Links => {
            println!(
                "✓ Would paginate {} seed(s) of '{}'",
                crawl.seeds.len(),
                crawl.name
            );
            if let Some(source) = &crawl.source {
                println!("✓ Plus the brand pages discovered by '{}'", source);
            }
        }
        CrawlKind::Brands | CrawlKind::Details | CrawlKind::Repair => {
            match orchestrator.planned_units() {
                Ok(Some(units)) => println!("✓ Would visit {} unit(s) of '{}'", units, crawl.name),
                Ok(None) => {}
                Err(e) => println!("✗ Cannot plan '{}' yet: {}", crawl.name, e),
            }
        }
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.output.database_path);

    let storage = open_storage(Path::new(&config.output.database_path))?;
    let stats = load_statistics(&storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main crawl operation, returning the process exit code
async fn handle_crawl(orchestrator: &mut Orchestrator) -> anyhow::Result<u8> {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Stop requested, finishing current units and flushing");
            on_signal.cancel();
        }
    });

    tracing::info!("Starting crawl '{}'", orchestrator.crawl().name);
    let summary = orchestrator.run(cancel).await?;
    print_run_summary(&summary);

    Ok(summary.outcome.exit_code())
}
