//! Crawl-Warden main entry point
//!
//! This is the command-line interface for the Crawl-Warden crawl orchestrator.

use anyhow::{bail, Context};
use clap::Parser;
use crawl_warden::config::{load_config_with_hash, Config};
use crawl_warden::crawler::{
    build_http_client, failures_by_domain, Collaborators, Coordinator, CrawlParts, HtmlExtractor,
    HttpFetcher, TaskResult,
};
use crawl_warden::notify::TracingNotifier;
use crawl_warden::robots::{HttpRobotsSource, PolitenessCache};
use crawl_warden::session::{RecoveryStrategy, SessionManager};
use crawl_warden::storage::{open_storage, SharedStorage};
use crawl_warden::TaskStatus;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Crawl-Warden: a policy-constrained crawl orchestrator
///
/// Crawl-Warden visits pages concurrently while respecting robots.txt,
/// adaptive per-domain delays and circuit breakers, and checkpoints its
/// session so an interrupted crawl can be resumed.
#[derive(Parser, Debug)]
#[command(name = "crawl-warden")]
#[command(version)]
#[command(about = "A policy-constrained crawl orchestrator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Task identifier (generated when omitted)
    #[arg(long)]
    task_id: Option<String>,

    /// Resume an interrupted session
    #[arg(long, value_name = "SESSION", conflicts_with_all = ["list_sessions", "cleanup_sessions", "dry_run"])]
    resume: Option<String>,

    /// List sessions that can still be recovered and exit
    #[arg(long, conflicts_with_all = ["cleanup_sessions", "dry_run"])]
    list_sessions: bool,

    /// Delete sessions older than the configured cleanup age and exit
    #[arg(long, conflicts_with = "dry_run")]
    cleanup_sessions: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let storage = open_storage(Path::new(&config.output.database_path))
        .with_context(|| format!("failed to open {}", config.output.database_path))?;
    let sessions = Arc::new(
        SessionManager::new(config.session.clone(), Arc::clone(&storage))
            .with_config_hash(config_hash),
    );

    if cli.list_sessions {
        return handle_list_sessions(&sessions);
    }
    if cli.cleanup_sessions {
        let removed = sessions
            .cleanup_old_sessions(Duration::from_secs(config.session.cleanup_age))
            .context("session cleanup failed")?;
        println!("Removed {} old sessions", removed);
        return Ok(());
    }

    let task_id = cli
        .task_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let result = handle_crawl(config, storage, sessions, task_id, cli.resume).await?;
    print_result(&result);

    if result.status == TaskStatus::Failed {
        bail!(
            "crawl failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("crawl_warden=info,warn"),
            1 => EnvFilter::new("crawl_warden=debug,info"),
            2 => EnvFilter::new("crawl_warden=trace,debug"),
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

fn handle_dry_run(config: &Config) {
    println!("=== Crawl-Warden Dry Run ===\n");

    println!("Frontier:");
    println!("  Max depth: {}", config.crawler.max_depth);
    println!("  Max URLs per domain: {}", config.crawler.max_urls_per_domain);
    println!("  Allowed domains: {:?}", config.crawler.allowed_domains);
    println!("  Blocked domains: {:?}", config.crawler.blocked_domains);

    println!("\nPoliteness:");
    println!("  Respect robots.txt: {}", config.politeness.respect_robots_txt);
    println!(
        "  Delay: {}s (min {}s, max {}s, adaptive: {})",
        config.delay.default_delay,
        config.delay.min_delay,
        config.delay.max_delay,
        config.delay.adaptive
    );
    println!(
        "  Circuit breaker: {} failures, {}s timeout",
        config.circuit_breaker.threshold, config.circuit_breaker.timeout
    );

    println!("\nOrchestration:");
    println!(
        "  Concurrent pages: {}",
        config.orchestration.max_concurrent_pages
    );
    println!(
        "  Retries: {} (enabled: {})",
        config.retry.max_retries, config.retry.enabled
    );
    println!("  User agent: {}", config.user_agent.header_value());
    println!("  Database: {}", config.output.database_path);

    println!("\nSeeds ({}):", config.crawler.seeds.len());
    for seed in &config.crawler.seeds {
        println!("  - {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

fn handle_list_sessions(sessions: &SessionManager) -> anyhow::Result<()> {
    let recoverable = sessions
        .list_recoverable_sessions()
        .context("failed to list sessions")?;

    if recoverable.is_empty() {
        println!("No recoverable sessions");
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!("{:<38} {:<20} {:>8} {:>10} {:>9}", "SESSION", "CHECKPOINT", "DONE", "REMAINING", "STRATEGY");
    for info in recoverable {
        println!(
            "{:<38} {:<20} {:>7.1}% {:>10} {:>9}",
            info.session_id,
            info.checkpoint_time.format("%Y-%m-%d %H:%M:%S"),
            info.estimated_progress,
            info.urls_remaining,
            info.strategy
        );
        if let Some(heartbeat) = sessions
            .last_heartbeat(&info.session_id)
            .context("failed to load heartbeat")?
        {
            println!(
                "    heartbeat: {} {}s ago, {} processed, {} remaining, health {:.2}",
                heartbeat.status,
                heartbeat.age_seconds(now),
                heartbeat.urls_processed,
                heartbeat.urls_remaining,
                heartbeat.health_score
            );
            if let Some(url) = &heartbeat.current_url {
                println!("    last url: {}", url);
            }
        }
        if let Some(reason) = info.crash_reason {
            println!("    crash: {}", reason);
        }
    }
    Ok(())
}

async fn handle_crawl(
    config: Config,
    storage: SharedStorage,
    sessions: Arc<SessionManager>,
    task_id: String,
    resume: Option<String>,
) -> anyhow::Result<TaskResult> {
    let client = build_http_client(&config.user_agent, config.orchestration.navigation_timeout())
        .context("failed to build HTTP client")?;
    let politeness = Arc::new(PolitenessCache::new(
        Arc::new(HttpRobotsSource::new(client.clone())),
        &config.politeness,
        config.user_agent.crawler_name.clone(),
    ));
    let new_parts = |session_id: String| {
        CrawlParts::from_config(
            &config,
            Some(Arc::clone(&storage)),
            session_id,
            Some(Arc::clone(&politeness)),
        )
    };

    let mut restored_progress = None;
    let parts = match resume {
        Some(session_id) => {
            let parts = new_parts(session_id.clone())?;
            let (checkpoint, info) = sessions.recover_session(&session_id, &parts)?;
            match info.strategy {
                RecoveryStrategy::Resume => {
                    tracing::info!("resuming session {}", session_id);
                    restored_progress = Some(checkpoint.progress);
                    parts
                }
                RecoveryStrategy::Restart => {
                    tracing::warn!(
                        "session {} cannot be resumed ({:?}); starting a new session",
                        session_id,
                        info.status
                    );
                    new_parts(uuid::Uuid::new_v4().to_string())?
                }
                RecoveryStrategy::Skip => {
                    bail!(
                        "session {} is {:.1}% complete; nothing worth resuming",
                        session_id,
                        info.estimated_progress
                    );
                }
            }
        }
        None => new_parts(uuid::Uuid::new_v4().to_string())?,
    };

    let timeout = config.orchestration.navigation_timeout();
    let coordinator = Arc::new(Coordinator::new(
        config,
        task_id,
        parts,
        Collaborators {
            fetcher: Arc::new(HttpFetcher::new(client, timeout)),
            extractor: Arc::new(HtmlExtractor),
            notifier: Arc::new(TracingNotifier),
            sessions: Some(sessions),
        },
    ));
    if let Some(progress) = restored_progress {
        coordinator.restore_progress(progress);
    }

    let signals = tokio::spawn(handle_interrupts(Arc::clone(&coordinator)));
    let result = coordinator.run().await;
    signals.abort();

    Ok(result?)
}

/// First Ctrl+C pauses (in-flight pages finish and a checkpoint is written),
/// the second cancels
async fn handle_interrupts(coordinator: Arc<Coordinator>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::warn!("interrupt received, pausing; press Ctrl+C again to stop");
    coordinator.pause();

    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::warn!("second interrupt, cancelling");
    coordinator.cancel();
}

fn print_result(result: &TaskResult) {
    println!("\n=== Crawl {} ===", result.status);
    println!("Task:      {}", result.task_id);
    println!("Session:   {}", result.session_id);
    println!("Duration:  {:.1}s", result.duration_seconds);
    println!(
        "Processed: {} ({} ok, {} failed, {} recovered by retry)",
        result.urls_processed, result.urls_successful, result.urls_failed, result.urls_recovered
    );
    println!("Extracted: {} items", result.data_extracted);
    if result.urls_circuit_skipped > 0 {
        println!("Skipped:   {} (circuit open)", result.urls_circuit_skipped);
    }

    if !result.failed_urls.is_empty() {
        let mut by_domain: Vec<_> = failures_by_domain(&result.failed_urls).into_iter().collect();
        by_domain.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        println!("\nFailures by domain:");
        for (domain, count) in by_domain {
            println!("  {:<40} {}", domain, count);
        }
    }

    if result.status == TaskStatus::Cancelled {
        println!("\nResume with: --resume {}", result.session_id);
    }
}
