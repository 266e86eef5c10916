#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use topicbus::config::{Config, GeneralConfig};
use topicbus::router::RouterHandle;
use topicbus::stats::StatsHistory;
use topicbus::Bus;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML file with router, filter and reliability settings
    #[arg(short, long, default_value = "topicbus.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    info!(config = %args.config, "topicbus starting");

    let config = match Config::load(&args.config).await {
        Ok(c) => c,
        Err(e) => {
            error!("cannot load {}: {:#}", args.config, e);
            return Err(e).context("loading configuration");
        }
    };

    let general = config.general.clone();
    let bus = Bus::start(config).await.context("starting bus")?;

    let mut handles = Vec::new();
    if general.stats_sample_interval_secs > 0 && general.stats_retention_secs > 0 {
        let stats_token = bus.cancel_token().child_token();
        handles.push(tokio::spawn(report_stats(bus.handle(), general, stats_token)));
    }

    let shutdown = bus.cancel_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping bus");
        }
        _ = shutdown.cancelled() => {}
    }

    bus.stop().await;
    if tokio::time::timeout(Duration::from_secs(2), futures::future::join_all(handles))
        .await
        .is_err()
    {
        error!("Background tasks did not stop within 2s");
    }
    info!("bus stopped");

    Ok(())
}

/// Samples router statistics and periodically logs windowed aggregates.
async fn report_stats(handle: RouterHandle, general: GeneralConfig, cancel_token: CancellationToken) {
    let sample_interval = general.stats_sample_interval_secs;
    let retention = general.stats_retention_secs;
    let log_interval = general.stats_log_interval_secs;

    let mut history = StatsHistory::new(retention);
    let mut last_log_time = 0u64;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("stats reporter stopped");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(sample_interval)) => {
                let stats = handle.stats();
                let timestamp = stats.timestamp;
                history.push(stats.clone());

                if log_interval == 0 || timestamp.saturating_sub(last_log_time) < log_interval {
                    continue;
                }

                if let Some(min1) = history.aggregate(60) {
                    info!(
                        "Stats [1min] routed={}, delayed avg={:.1} max={}",
                        min1.routed_in_window, min1.avg_delayed, min1.max_delayed
                    );
                }

                if let Some(all) = history.aggregate(retention) {
                    info!(
                        "Stats [{}s] routed={}, samples={}, recipients={}, subscriptions={}, interceptors={}",
                        retention,
                        all.routed_in_window,
                        all.sample_count,
                        stats.recipients,
                        stats.subscriptions,
                        stats.interceptors
                    );
                }

                last_log_time = timestamp;
            }
        }
    }
}
