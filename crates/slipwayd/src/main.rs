//! slipwayd command line.
//!
//! ```text
//! slipwayd run --orders orders.json --config slipway.toml
//! slipwayd check-config --config slipway.toml
//! slipwayd default-config > slipway.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use slipway_runtime::InMemoryRuntime;
use slipwayd::{load_config, run_orders, OrderFile};

#[derive(Parser)]
#[command(name = "slipwayd", about = "Slipway deployment daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute an order file and print the reports as JSON.
    Run {
        /// JSON order file.
        #[arg(long)]
        orders: PathBuf,

        /// slipway.toml; stock settings when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Parse and validate a configuration file.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the stock configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Run { orders, config } => {
            let config = load_config(config.as_deref())?;
            let file = OrderFile::from_file(&orders)?;
            let runtime = Arc::new(InMemoryRuntime::new());

            let summary = tokio::select! {
                summary = run_orders(&config, file, runtime) => summary?,
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted; in-flight orders abandoned");
                    anyhow::bail!("interrupted");
                }
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.all_succeeded() {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::CheckConfig { config } => {
            let config = load_config(Some(&config))?;
            info!(
                max_concurrent_orders = config.scheduler.max_concurrent_orders,
                canary_steps = ?config.orchestrator.canary_steps,
                "configuration valid"
            );
            println!("ok");
            Ok(())
        }
        Command::DefaultConfig => {
            print!("{}", slipway_core::SlipwayConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,slipwayd=debug,slipway=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
