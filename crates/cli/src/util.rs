//! Shared helpers for the command line

use backwatch_core::Config;
use owo_colors::OwoColorize;
use std::time::Duration;
use watcher::WatcherStats;

/// Print the startup banner
pub fn print_banner(config: &Config) {
    println!();
    println!("{}", "Backwatch - file watcher & auto-backup".bold().cyan());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!(
        "Monitoring:    {} {}",
        config.source_root.display().to_string().green().bold(),
        "(recursive)".dimmed()
    );
    println!(
        "Backup to:     {}",
        config.backup_root.display().to_string().green().bold()
    );
    println!(
        "Versions:      {}",
        config.max_versions.to_string().yellow().bold()
    );
    println!(
        "Interval:      {}",
        humantime::format_duration(config.min_interval).to_string().yellow()
    );
    println!(
        "Workers:       {}",
        config.workers.to_string().magenta().bold()
    );
    if !config.ignore_patterns.is_empty() {
        println!(
            "Ignoring:      {}",
            config.ignore_patterns.join(", ").dimmed()
        );
    }
    println!();
    println!("{}", "Press Ctrl+C to stop watching and exit.".yellow());
    println!();
}

/// Print a statistics block
pub fn print_stats(stats: &WatcherStats) {
    println!();
    println!("{}", "Statistics".bold());
    println!(
        "  {} Tracked files:  {}",
        "*".dimmed(),
        stats.tracked_paths.to_string().green().bold()
    );
    println!(
        "  {} Queue:          {}",
        "*".dimmed(),
        format!("{}/{}", stats.queue_len, stats.queue_capacity)
            .yellow()
            .bold()
    );
    println!(
        "  {} Active workers: {}",
        "*".dimmed(),
        stats.active_workers.to_string().magenta().bold()
    );
}

pub fn print_shutdown() {
    println!();
    println!("{}", "Closing application...".yellow().bold());
}

pub fn print_shutdown_complete(elapsed: Duration) {
    let rounded = Duration::from_millis(elapsed.as_millis() as u64);
    println!(
        "{} {} in {}",
        "✓".green(),
        "Application closed".green().bold(),
        humantime::format_duration(rounded).to_string().cyan()
    );
}
