//! NetPulse Monitoring Service
//!
//! Thin wiring around the measurement core: loads configuration, opens
//! the result store, registers the configured hosts as a recurring job
//! (or runs one manual cycle) and logs emitted per-target events.
//!
//! Usage:
//!   netpulse --db netpulse.db --interval 60
//!   netpulse --once
//!
//! Environment Variables:
//!   NETPULSE_CONFIG_PATH - Path to TOML config file
//!   NETPULSE_DB_PATH - SQLite database path
//!   NETPULSE_LOG_LEVEL - Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use netpulse_backend::config::MonitorConfig;
use netpulse_backend::orchestrator::{ProbeOrchestrator, RunMode, Target};
use netpulse_backend::scheduler::JobScheduler;
use netpulse_backend::store::ResultStore;

#[derive(Parser, Debug)]
#[command(name = "netpulse")]
#[command(about = "Endpoint reachability and quality monitoring service")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "NETPULSE_CONFIG_PATH")]
    config: Option<String>,

    /// SQLite database path
    #[arg(short, long, default_value = "netpulse.db", env = "NETPULSE_DB_PATH")]
    db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "NETPULSE_LOG_LEVEL")]
    log_level: String,

    /// Run a single cycle over all configured hosts, then exit
    #[arg(long)]
    once: bool,

    /// Interval in seconds for the recurring job
    #[arg(long, default_value = "60")]
    interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting NetPulse monitoring service");

    let config = if let Some(config_path) = &args.config {
        info!("Loading config from {}", config_path);
        let content = tokio::fs::read_to_string(config_path).await?;
        toml::from_str(&content)?
    } else {
        info!("Using default configuration");
        MonitorConfig::default()
    };

    let store = ResultStore::open(&args.db)?;

    let targets: Vec<Target> = store
        .list_hosts()?
        .into_iter()
        .map(|h| Target {
            host: h.address,
            group_id: h.group_id,
        })
        .collect();

    if targets.is_empty() {
        warn!("No hosts configured in {}; nothing to measure", args.db);
        return Ok(());
    }
    info!("Monitoring {} hosts", targets.len());

    let interval = Duration::from_secs(args.interval);
    let orchestrator = Arc::new(ProbeOrchestrator::new(store, config));

    // External consumers would subscribe here; the service itself only
    // logs the event stream.
    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!(
                "{} {} loss={:.1}% avg={}ms alerts='{}'",
                event.timestamp,
                event.host,
                event.stats.packet_loss_pct,
                event
                    .stats
                    .avg_latency_ms
                    .map(|v| format!("{:.1}", v))
                    .unwrap_or_else(|| "-".to_string()),
                event.alerts_text
            );
        }
    });

    if args.once {
        let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        orchestrator
            .run(&targets, RunMode::Once, interval, cancel_rx)
            .await?;
        return Ok(());
    }

    let scheduler = JobScheduler::new(orchestrator.clone());
    scheduler.start_job("default", targets, args.interval)?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    scheduler.shutdown().await;

    Ok(())
}
