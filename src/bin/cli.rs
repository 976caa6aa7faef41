//! Coupon Crawler CLI
//!
//! Local execution entry point for the crawl scheduler and its pieces.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::DateTime;
use clap::{Parser, Subcommand};
use coupon_crawler::{
    error::Result,
    models::Config,
    pipeline::Scheduler,
    services::{CouponValidator, Validation},
    storage::{LocalStorage, RoundStateStore, Stores},
    utils::http::{Fetcher, HttpFetcher},
};
use tokio::sync::watch;

/// Free course coupon crawler
#[derive(Parser, Debug)]
#[command(
    name = "coupon-crawler",
    version,
    about = "Discovers, validates and refreshes free course coupons"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Storage directory (overrides `storage.dir` from the config)
    #[arg(short, long)]
    storage_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run rounds forever until Ctrl-C
    Run,

    /// Run a single round and print its summary
    Once,

    /// Run the discovery sources and print the URLs found
    Discover,

    /// Validate one coupon URL
    Check {
        /// Coupon URL containing a couponCode parameter
        url: String,
    },

    /// Validate the configuration file
    Validate,

    /// Show last round time and catalog size
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Resolve to `true` on Ctrl-C. The sender stays alive if the handler can't be installed.
fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Ctrl-C received, stopping after the current round");
                let _ = tx.send(true);
            }
            Err(e) => {
                log::error!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    log::info!("Loaded configuration from {}", cli.config.display());

    let storage_dir = cli
        .storage_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.storage.dir));

    match cli.command {
        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }

        Command::Info => {
            let storage = LocalStorage::open(&storage_dir).await?;
            log::info!("Storage directory: {}", storage_dir.display());

            match storage.load_last_round().await? {
                Some(millis) => match DateTime::from_timestamp_millis(millis) {
                    Some(at) => log::info!("Last round: {}", at.to_rfc3339()),
                    None => log::warn!("Last round time is out of range: {}", millis),
                },
                None => log::info!("No round has run yet."),
            }
            log::info!("Active coupons: {}", storage.catalog_len().await);
            log::info!("Expired coupons: {}", storage.expired_len().await);
        }

        Command::Check { url } => {
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.http)?);
            let validator = CouponValidator::new(fetcher)?;

            match validator.validate(&url, None).await? {
                Validation::Valid(record) => {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
                Validation::Expired { course_id, title } => {
                    println!(
                        "expired (course {}{})",
                        course_id,
                        title.map(|t| format!(": {t}")).unwrap_or_default()
                    );
                }
            }
        }

        command @ (Command::Run | Command::Once | Command::Discover) => {
            config.validate()?;

            let storage = Arc::new(LocalStorage::open(&storage_dir).await?);
            let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(&config.http)?);
            let scheduler = Scheduler::from_config(&config, fetcher, Stores::local(storage))?;

            match command {
                Command::Discover => {
                    for url in scheduler.discover().await {
                        println!("{url}");
                    }
                }
                Command::Once => {
                    let summary = scheduler.run_round().await?;
                    log::info!("Round complete: {}", summary);
                }
                _ => scheduler.run(shutdown_on_ctrl_c()).await,
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
