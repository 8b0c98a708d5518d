mod config;
mod measurement;
mod metrics;
mod parser;
mod prober;
mod scheduler;
mod stats;
mod store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

use config::{load_file_config, ProbeConfig};
use prober::curl::CurlProber;
use scheduler::Scheduler;
use store::MeasurementStore;

#[derive(Parser, Debug)]
#[command(name = "connect-latency")]
#[command(about = "Measure DNS and TCP connect latency to a set of URLs, and summarize the results")]
struct Cli {
    /// Path to the JSON target configuration
    #[arg(short, long, env = "TARGET_CONFIG", default_value = "targets.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every configured target once and append the results to the log
    Measure,
    /// Summarize TCP connect time per URL from the measurement log
    Stats {
        /// Measurement log to read (defaults to the configured output_file)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Where to write the CSV export (defaults to the log path with a .csv extension)
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

fn init_tracing(level: tracing::Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env()
                         .add_directive(format!("connect_latency={}", level.as_str().to_lowercase()).parse()?))
        .init();
    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Measure => {
            // Load config first to get log level
            let config = load_file_config(&cli.config).await?;
            init_tracing(config.get_tracing_level()?)?;
            measure(config).await
        }
        Command::Stats { input, csv } => {
            // --input alone is enough when there is no config file around
            let config = if input.is_some() && !cli.config.exists() {
                None
            } else {
                Some(load_file_config(&cli.config).await?)
            };
            let level = match &config {
                Some(c) => c.get_tracing_level()?,
                None => tracing::Level::INFO,
            };
            init_tracing(level)?;

            let input = input
                .or_else(|| config.as_ref().map(|c| c.output_file.clone()))
                .ok_or_else(|| anyhow::anyhow!("No measurement log given"))?;
            let csv = csv
                .or_else(|| config.as_ref().map(ProbeConfig::default_csv_path))
                .unwrap_or_else(|| input.with_extension("csv"));

            stats::run(&input, &csv).await.map(|_| ())
        }
    }
}

async fn measure(config: ProbeConfig) -> Result<()> {
    let store = MeasurementStore::open(&config.output_file).await?;
    let output = store.path().to_path_buf();
    let concurrency = config.effective_concurrency();
    info!(
        "Probing {} targets with concurrency {}, timeout {}s, follow redirects: {}",
        config.targets.len(),
        concurrency,
        config.timeout_secs,
        config.follow_redirects
    );

    let scheduler = Scheduler::new(
        CurlProber::from_config(&config),
        store,
        config.capture_headers.clone(),
        concurrency,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Waiting for in-flight probes (Ctrl+C again to abort)...");
            let _ = shutdown_tx.send(true);
            if tokio::signal::ctrl_c().await.is_ok() {
                error!("User requested abort (Ctrl+C twice)");
                std::process::exit(130);
            }
        }
    });

    let summary = scheduler.run(config.targets.clone(), shutdown_rx).await?;

    if let Some(path) = &config.metrics_textfile {
        if let Err(e) = metrics::write_textfile(path).await {
            error!("Failed to write metrics textfile {}: {:#}", path.display(), e);
        }
    }

    info!(
        "All done: {} attempted, {} ok, {} failed, {} skipped. Results appended to {}",
        summary.attempted,
        summary.succeeded,
        summary.failed,
        summary.skipped,
        output.display()
    );
    Ok(())
}
