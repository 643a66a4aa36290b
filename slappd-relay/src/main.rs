//! slappd
//!
//! Polls Untappd for new check-ins of a set of users and relays each one,
//! exactly in order, to a Slack channel.

mod config;
mod shutdown;

use anyhow::Context;
use clap::Parser;
use config::{ConfigLoader, RelayConfig};
use shutdown::spawn_shutdown_handler;
use slappd_core::message::{MessageRenderer, UNTAPPD_WEB_BASE};
use slappd_core::processors::{PollScheduler, SlackNotifier, UntappdSource};
use slappd_core::store::{FileMarkStore, MarkStore, MemoryMarkStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// slappd - Untappd to Slack check-in relay
#[derive(Parser, Debug)]
#[command(name = "slappd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./slappd.toml")]
    config: PathBuf,

    /// Override the poll interval in seconds
    #[arg(long, env = "CHECK_SECONDS")]
    check_seconds: Option<u64>,

    /// Poll every account once, then exit
    #[arg(long, default_value = "false")]
    once: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    init_tracing(args.json_logs);

    tracing::info!("Starting slappd v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = ConfigLoader::new(&args.config, args.check_seconds)
        .load()
        .map_err(|e| {
            tracing::error!("Failed to load configuration: {}", e);
            e
        })?;
    tracing::info!(
        accounts = config.accounts.len(),
        interval_secs = config.scheduler.interval.as_secs(),
        "Configuration loaded"
    );

    let shutdown_rx = spawn_shutdown_handler().context("failed to install signal handlers")?;

    match config.state_path.clone() {
        Some(path) => {
            let marks = FileMarkStore::open(&path)
                .await
                .with_context(|| format!("failed to open mark file {}", path.display()))?;
            relay(config, Arc::new(marks), args.once, shutdown_rx).await
        }
        None => {
            tracing::warn!("No state path configured, marks are kept in memory only");
            relay(config, Arc::new(MemoryMarkStore::new()), args.once, shutdown_rx).await
        }
    }
}

/// Build the processors and run them against `marks`.
async fn relay<M>(
    config: RelayConfig,
    marks: Arc<M>,
    once: bool,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    M: MarkStore + 'static,
{
    let source = UntappdSource::new(config.untappd).context("failed to build Untappd client")?;
    let notifier = SlackNotifier::new(
        config.slack,
        MessageRenderer::new(UNTAPPD_WEB_BASE, config.slack_username),
        config.slack_timeout,
    )
    .context("failed to build Slack client")?;

    let scheduler = PollScheduler::new(
        config.accounts,
        Arc::new(source),
        Arc::new(notifier),
        Arc::clone(&marks),
        config.scheduler,
    );

    let result = if once {
        tokio::select! {
            results = scheduler.run_once() => {
                let mut failed = 0;
                for (account, result) in &results {
                    match result {
                        Ok(outcome) => {
                            tracing::info!(account = %account, ?outcome, "Poll complete");
                        }
                        Err(e) => {
                            tracing::error!(account = %account, error = %e, "Poll failed");
                            failed += 1;
                        }
                    }
                }
                if failed > 0 {
                    Err(anyhow::anyhow!("{failed} of {} accounts failed", results.len()))
                } else {
                    Ok(())
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("Shutdown requested, abandoning poll");
                Ok(())
            }
        }
    } else {
        scheduler.run(shutdown_rx).await;
        Ok(())
    };

    match marks.snapshot().await {
        Ok(snapshot) => tracing::info!(marks = ?snapshot, "Relay stopped"),
        Err(e) => tracing::warn!(error = %e, "Failed to read final marks"),
    }

    result
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

    let (plain, json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}
