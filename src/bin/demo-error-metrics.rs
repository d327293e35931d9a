use anyhow::Context;
use clap::Parser;
use graphite_error_counter::{init_logging, AppenderConfig, ErrorMetricsAppender};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "demo-error-metrics")]
#[command(about = "Logs a burst of errors and publishes their counts to Graphite")]
#[command(version = "0.1.0")]
struct Cli {
    /// TOML config file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    subsystem: Option<String>,
    /// Number of ERROR events to emit
    #[arg(long, default_value_t = 5)]
    errors: u32,
    /// How long to keep publishing before shutting down
    #[arg(long, default_value_t = 65)]
    wait_seconds: u64,
    /// Also write JSON logs to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn process_order(id: u32) {
    if id % 2 == 0 {
        error!(order_id = id, "Payment provider rejected the order");
    } else {
        error!(order_id = id, "Inventory lookup failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppenderConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppenderConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(subsystem) = cli.subsystem {
        config.subsystem = subsystem;
    }

    let appender = ErrorMetricsAppender::new(config)?;
    let _guard = init_logging(appender.layer(), cli.log_dir.as_deref())?;
    appender.start()?;

    info!(
        address = %appender.config().publisher().address(),
        errors = cli.errors,
        "Emitting demo errors"
    );
    for id in 0..cli.errors {
        process_order(id);
    }
    warn!("Warnings are never counted");
    error!(fatal = true, "Simulated unrecoverable failure");

    tokio::time::sleep(Duration::from_secs(cli.wait_seconds)).await;
    appender.stop();
    Ok(())
}
