//! Swarmcrawl worker entry point
//!
//! One invocation runs one worker process: a set of symmetric fetch loops
//! against the shared coordination store and the document store. Exit
//! codes: 0 clean shutdown, 2 misconfiguration, 3 coordination store
//! unreachable at startup, 4 document store unopenable at startup.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swarmcrawl::config::{load_config_with_hash, Config};
use swarmcrawl::coord::{CoordStore, MemoryCoordStore};
use swarmcrawl::crawler::run_crawl;
use swarmcrawl::storage::{DocumentStore, SqliteDocumentStore};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

const EXIT_MISCONFIGURED: i32 = 2;
const EXIT_COORD_UNREACHABLE: i32 = 3;
const EXIT_DOCSTORE_UNREACHABLE: i32 = 4;

/// Swarmcrawl: a horizontally scalable polite web crawler
#[derive(Parser, Debug)]
#[command(name = "swarmcrawl")]
#[command(version)]
#[command(about = "Distributed polite web crawler worker", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Additional seed URLs, appended to the configured ones
    #[arg(short, long, value_name = "URL")]
    seed: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate the configuration, print the effective settings, and exit
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Print document store counts and exit
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let mut config = match load_cli_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {}", e);
            std::process::exit(EXIT_MISCONFIGURED);
        }
    };
    config.crawl.seeds.extend(cli.seed.iter().cloned());

    if cli.dry_run {
        print_dry_run(&config);
        return Ok(());
    }

    if cli.stats {
        return print_stats(&config);
    }

    // The in-process store backs single-machine deployments; a networked
    // backend slots in behind the same trait.
    let coord: Arc<dyn CoordStore> = Arc::new(MemoryCoordStore::new());
    if let Err(e) = coord.ping().await {
        tracing::error!("coordination store unreachable: {}", e);
        std::process::exit(EXIT_COORD_UNREACHABLE);
    }

    let docs: Box<dyn DocumentStore> =
        match SqliteDocumentStore::new(Path::new(&config.storage.database_path)) {
            Ok(store) => Box::new(store),
            Err(e) => {
                tracing::error!(
                    "document store unreachable at {}: {}",
                    config.storage.database_path,
                    e
                );
                std::process::exit(EXIT_DOCSTORE_UNREACHABLE);
            }
        };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = run_crawl(config, coord, docs, shutdown_rx)
        .await
        .context("crawl failed")?;

    tracing::info!(
        fetched = summary.fetched,
        persisted = summary.persisted,
        failed = summary.failed,
        "crawl finished"
    );
    Ok(())
}

fn load_cli_config(cli: &Cli) -> swarmcrawl::ConfigResult<Config> {
    match &cli.config {
        Some(path) => {
            tracing::info!("loading configuration from {}", path.display());
            let (config, hash) = load_config_with_hash(path)?;
            tracing::info!(config_hash = %hash, "configuration loaded");
            Ok(config)
        }
        None => {
            tracing::info!("no config file given, using defaults");
            Ok(Config::default())
        }
    }
}

/// Sets up the tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("swarmcrawl=info,warn"),
            1 => EnvFilter::new("swarmcrawl=debug,info"),
            2 => EnvFilter::new("swarmcrawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_dry_run(config: &Config) {
    println!("=== Swarmcrawl Dry Run ===\n");

    println!("Worker:");
    println!("  Concurrency: {}", config.worker.concurrency);
    println!(
        "  Max pages: {}",
        if config.worker.max_pages == 0 {
            "unlimited".to_string()
        } else {
            config.worker.max_pages.to_string()
        }
    );

    println!("\nFetch:");
    println!("  User agent: {}", config.fetch.user_agent());
    println!("  Timeout: {}s", config.fetch.fetch_timeout_seconds);
    println!("  Max content length: {} bytes", config.fetch.max_content_length);

    println!("\nPoliteness:");
    println!(
        "  Crawl delay floor: {}s",
        config.politeness.default_crawl_delay_seconds
    );
    println!("  Lease TTL: {}s", config.politeness.lease_ttl_seconds);
    println!("  Robots TTL: {}s", config.politeness.robots_ttl_seconds);

    println!("\nFrontier:");
    println!("  Claim TTL: {}s", config.frontier.claim_ttl_seconds);
    println!("  Max retries: {}", config.frontier.max_retries);
    println!("  Soft limit: {}", config.frontier.soft_limit);

    println!("\nFilter:");
    println!("  Capacity: {}", config.filter.capacity);
    println!("  Error rate: {}", config.filter.error_rate);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!(
        "  Batch: {} records / {}s",
        config.storage.batch_size, config.storage.batch_age_seconds
    );

    println!("\nSeeds ({}):", config.crawl.seeds.len());
    for seed in &config.crawl.seeds {
        println!("  - {}", seed);
    }

    println!("\nConfiguration is valid");
}

fn print_stats(config: &Config) -> anyhow::Result<()> {
    let store = match SqliteDocumentStore::new(Path::new(&config.storage.database_path)) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("document store unreachable: {}", e);
            std::process::exit(EXIT_DOCSTORE_UNREACHABLE);
        }
    };

    println!("Database: {}\n", config.storage.database_path);
    println!("Pages:            {}", store.count_pages()?);
    println!("Distinct bodies:  {}", store.count_contents()?);
    Ok(())
}
