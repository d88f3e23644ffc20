//! lalafo crawler CLI
//!
//! Local execution entry point.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lalafo_crawler::{
    error::Result,
    models::Config,
    pipeline::Pipeline,
    storage::{AdStorage, LocalStorage},
};
use tokio_util::sync::CancellationToken;

/// lalafo.kg car listing crawler
#[derive(Parser, Debug)]
#[command(
    name = "lalafo-crawler",
    version,
    about = "Crawl lalafo.kg car ads into raw and cleaned datasets"
)]
struct Cli {
    /// Path to storage directory for datasets and config.toml
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Config file (default: {storage_dir}/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl listings, fetch ads, clean and save
    Run {
        /// Reuse raw_data.json when it is fresh enough
        #[arg(long)]
        reuse_raw: bool,

        /// Stop fetching after this many seconds and keep what was fetched
        #[arg(long)]
        deadline_secs: Option<u64>,
    },

    /// Re-clean the stored raw data without fetching
    Clean,

    /// Validate configuration
    Validate,

    /// Show stored dataset info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel on Ctrl-C, or when the deadline passes.
fn cancellation(deadline: Option<Duration>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, finishing with the ads fetched so far");
            on_signal.cancel();
        }
    });

    if let Some(deadline) = deadline {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            log::warn!("Deadline of {}s reached, stopping", deadline.as_secs());
            on_deadline.cancel();
        });
    }

    cancel
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));
    let mut config = Config::load_or_default(&config_path);
    log::info!("Loaded configuration from {}", config_path.display());

    match cli.command {
        Command::Run {
            reuse_raw,
            deadline_secs,
        } => {
            config.freshness.reuse_raw |= reuse_raw;
            config.validate()?;

            let storage = LocalStorage::new(&cli.storage_dir).with_output(config.output.clone());
            let pipeline = Pipeline::from_config(Arc::new(config), Arc::new(storage))?;

            let cancel = cancellation(deadline_secs.map(Duration::from_secs));
            let summary = pipeline.run(&cancel).await?;

            if summary.is_partial() {
                log::warn!(
                    "Run was interrupted: {} of {} discovered ads saved",
                    summary.cleaned_count,
                    summary.refs_discovered
                );
            }
        }

        Command::Clean => {
            config.validate()?;

            let storage = LocalStorage::new(&cli.storage_dir).with_output(config.output.clone());
            let pipeline = Pipeline::from_config(Arc::new(config), Arc::new(storage))?;
            pipeline.clean_only().await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "Config OK: seeds from {}, {} extra start URL(s), pool of {}, {} attempts per URL",
                config.listing.root_url.as_deref().unwrap_or("(none)"),
                config.listing.start_urls.len(),
                config.crawler.pool_size,
                config.retry.max_retries
            );
        }

        Command::Info => {
            let storage = LocalStorage::new(&cli.storage_dir);
            log::info!("Storage directory: {}", storage.root_dir().display());

            match storage.load_raw().await? {
                Some(raw) => log::info!(
                    "Raw data: {} ads, written {}{}",
                    raw.count,
                    raw.updated_at,
                    if raw.complete { "" } else { " (interrupted run)" }
                ),
                None => log::info!("No raw data found yet."),
            }

            match storage.load_cleaned().await? {
                Some(cleaned) => log::info!(
                    "Cleaned data: {} ads, written {}",
                    cleaned.count,
                    cleaned.updated_at
                ),
                None => log::info!("No cleaned data found yet."),
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
