mod config;
mod detection;
mod models;
mod monitoring;
mod storage;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use config::AgentConfig;
use models::RunOptions;
use monitoring::process_collector::SystemCollector;
use storage::ReportSink;

/// Host process monitoring agent.
#[derive(Debug, Parser)]
#[command(name = "procwatch", version, about)]
struct Cli {
    /// Keep scanning until interrupted instead of running a single cycle.
    #[arg(short, long)]
    continuous: bool,

    /// Seconds to wait between cycles in continuous mode.
    #[arg(
        short,
        long,
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// Directory holding whitelist.json and detection_rules.yaml.
    #[arg(long, default_value = "config")]
    config: PathBuf,

    /// Root directory for reports/ and logs/.
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            continuous: self.continuous,
            interval_seconds: self.interval,
            config_path: self.config.clone(),
            output_dir: self.output.clone(),
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let options = cli.run_options();

    let config = match AgentConfig::load(&options.config_path) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(component = "config", "cannot start: {err}");
            return ExitCode::from(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(component = "scheduler", "interrupt received, finishing current cycle");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        component = "scheduler",
        continuous = options.continuous,
        interval_seconds = options.interval_seconds,
        output = %options.output_dir.display(),
        "procwatch starting"
    );

    let sink = ReportSink::new(&options.output_dir);
    let collector = Arc::new(Mutex::new(SystemCollector::new()));
    let cycles =
        monitoring::start_monitoring(&options, collector, config, &sink, shutdown_rx).await;

    info!(component = "scheduler", cycles, "procwatch stopped");
    ExitCode::SUCCESS
}
