use std::path::PathBuf;
use std::sync::Arc;

use abpilot::experiments::progress::progress_report;
use abpilot::{
    AdsPlatform, DryRunAds, JsonTestStore, LogNotifier, MonitorConfig, TestMonitor, TestStore,
};
use abpilot_ads::{AdsClientConfig, HttpAdsClient};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "abpilot", about = "Monitors running A/B tests and rolls out winners")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[arg(long, env = "ABPILOT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Log ads-platform mutations instead of sending them.
    #[arg(long, env = "ABPILOT_DRY_RUN")]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Process every monitored test once and exit (default)
    RunOnce,
    /// Run a cycle on a fixed interval until interrupted
    Watch {
        #[arg(long, env = "ABPILOT_MONITOR_INTERVAL_SECS")]
        interval_secs: Option<u64>,
    },
    /// Print the progress report of one test as JSON
    Status { test_id: String },
    /// Conclude a test now with the given winner
    Conclude { test_id: String, variant_id: String },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn build_ads(cli: &Cli) -> Result<Arc<dyn AdsPlatform>, Box<dyn std::error::Error>> {
    if cli.dry_run {
        tracing::warn!("Dry run: ads-platform mutations are logged, not sent");
        return Ok(Arc::new(DryRunAds));
    }
    match AdsClientConfig::load(&cli.data_dir) {
        Some(config) => Ok(Arc::new(HttpAdsClient::new(&config)?)),
        None => Err(
            "no ads platform configured: set ABPILOT_ADS_BASE_URL, write ads.json, or pass --dry-run"
                .into(),
        ),
    }
}

fn build_monitor(
    cli: &Cli,
    store: Arc<JsonTestStore>,
    config: &MonitorConfig,
) -> Result<TestMonitor, Box<dyn std::error::Error>> {
    let ads = build_ads(cli)?;
    Ok(TestMonitor::new(store, ads, Arc::new(LogNotifier), config))
}

async fn run_watch(monitor: TestMonitor, interval_secs: u64) {
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
    // A cycle that overruns the interval does not trigger a burst of catch-up cycles.
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tracing::info!(interval_secs, "Watching monitored tests");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                monitor.run_cycle().await;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping");
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    std::fs::create_dir_all(&cli.data_dir)?;
    let config = MonitorConfig::load_or_default(&cli.data_dir);
    let store = Arc::new(JsonTestStore::new(&cli.data_dir)?);

    match &cli.command {
        None | Some(Command::RunOnce) => {
            let monitor = build_monitor(&cli, Arc::clone(&store), &config)?;
            let summary = monitor.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Some(Command::Watch { interval_secs }) => {
            let config = match interval_secs {
                Some(secs) => config.with_interval_secs(*secs),
                None => config,
            };
            let monitor = build_monitor(&cli, Arc::clone(&store), &config)?;
            run_watch(monitor, config.interval_secs.max(1)).await;
            Ok(())
        }
        Some(Command::Status { test_id }) => {
            let test = store.get_test(test_id)?;
            let report = progress_report(&test, &config.bid_rules, now_ms());
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Command::Conclude {
            test_id,
            variant_id,
        }) => {
            let monitor = build_monitor(&cli, Arc::clone(&store), &config)?;
            match monitor
                .conclude_manually(test_id, variant_id, now_ms())
                .await?
            {
                Some(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
                None => Err(format!("test {test_id} is being processed by another monitor").into()),
            }
        }
    }
}
