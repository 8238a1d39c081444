//! Backwatch CLI - backwatch command

use anyhow::{anyhow, Context, Result};
use backwatch_core::Config;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{info, warn, Level};
use watcher::BackupWatcher;

mod util;

/// Backwatch - monitors a directory and keeps versioned backups of changed files
#[derive(Parser, Debug)]
#[command(name = "backwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to monitor for changes
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Directory to store backups in
    #[arg(short, long)]
    backup: Option<PathBuf>,

    /// Maximum number of versions to keep per file (default: 3)
    #[arg(long, visible_alias = "vers")]
    versions: Option<usize>,

    /// Minimum time between backups of the same file, e.g. 5s, 250ms, 2m (default: 5s)
    #[arg(short, long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Number of backup workers (default: 3)
    #[arg(long)]
    workers: Option<usize>,

    /// Maximum number of pending backups (default: 100)
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Ignore pattern; replaces the defaults when given (repeatable)
    #[arg(long = "ignore", value_name = "PATTERN")]
    ignore: Vec<String>,

    /// TOML configuration file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Layer command-line flags over the config file (or the defaults)
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::new(PathBuf::new(), PathBuf::new()),
        };

        if let Some(source) = self.source {
            config.source_root = source;
        }
        if let Some(backup) = self.backup {
            config.backup_root = backup;
        }
        if let Some(versions) = self.versions {
            config.max_versions = versions;
        }
        if let Some(interval) = self.interval {
            config.min_interval = interval;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if !self.ignore.is_empty() {
            config.ignore_patterns = self.ignore;
        }

        if config.source_root.as_os_str().is_empty() {
            anyhow::bail!("no source directory given (use --source or `source` in the config file)");
        }
        if config.backup_root.as_os_str().is_empty() {
            anyhow::bail!("no backup directory given (use --backup or `backup` in the config file)");
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.into_config()?;
    run(config).await
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Run the watcher until a shutdown signal arrives or the watcher fails
async fn run(config: Config) -> Result<()> {
    let started = Instant::now();
    let stats_every = config.stats_interval.max(Duration::from_secs(1));

    let watcher = Arc::new(BackupWatcher::new(config).context("failed to create file watcher")?);
    util::print_banner(watcher.config());

    let mut watch_task = {
        let watcher = Arc::clone(&watcher);
        tokio::task::spawn_blocking(move || watcher.start())
    };

    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + stats_every, stats_every);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            result = &mut watch_task => {
                // start() only returns on its own when something went wrong
                return match result {
                    Ok(Ok(())) => Err(anyhow!("watcher exited unexpectedly")),
                    Ok(Err(e)) => Err(e.context("watcher error")),
                    Err(e) => Err(anyhow!(e).context("watcher task panicked")),
                };
            }
            _ = ticker.tick() => util::print_stats(&watcher.stats()),
        }
    }

    util::print_shutdown();
    info!("Shutting down, waiting for in-flight backups");

    let stopper = Arc::clone(&watcher);
    tokio::task::spawn_blocking(move || stopper.stop())
        .await
        .context("shutdown task failed")?;
    watch_task.await.context("watcher task failed")??;

    util::print_shutdown_complete(started.elapsed());
    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
