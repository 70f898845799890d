//! tidelined: the Tideline daemon.
//!
//! Single binary that assembles the autoscaler:
//! - State store (redb)
//! - Workload registry
//! - Metric sampler + aggregator
//! - Scale executor
//! - Autoscaler loop
//! - REST API + Prometheus exposition
//!
//! # Usage
//!
//! ```text
//! tidelined run --config tideline.toml --port 8480 --data-dir /var/lib/tideline
//! tidelined check --config tideline.toml
//! tidelined init > tideline.toml
//! ```

mod daemon;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tideline_autoscale::{WorkloadRegistry, epoch_secs};
use tideline_core::TidelineConfig;
use tideline_state::WorkloadSpec;

const DEFAULT_LOG_FILTER: &str = "info,tidelined=debug,tideline=debug";

#[derive(Parser)]
#[command(name = "tidelined", about = "Tideline autoscaler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler loop and API server.
    Run {
        /// Path to tideline.toml.
        #[arg(long, default_value = "tideline.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/tideline")]
        data_dir: PathBuf,

        /// Log output format.
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },
    /// Validate a config file and list the workloads it registers.
    Check {
        #[arg(long, default_value = "tideline.toml")]
        config: PathBuf,
    },
    /// Print a starter config for one workload.
    Init {
        #[arg(long, default_value = "default")]
        namespace: String,

        #[arg(long, default_value = "api")]
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            log_format,
        } => {
            init_tracing(log_format);
            daemon::run_daemon(&config, port, data_dir).await
        }
        Command::Check { config } => check(&config),
        Command::Init { namespace, name } => {
            print!("{}", TidelineConfig::scaffold(&namespace, &name).to_toml_string()?);
            Ok(())
        }
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let config = TidelineConfig::from_file(path)?;
    daemon::engine_settings(&config)?;
    daemon::retry_policy(&config)?;
    if let Some(metrics) = &config.metrics {
        metrics.timeout()?;
    }

    let now = epoch_secs();
    for workload in &config.workloads {
        let spec = WorkloadSpec::from_config(workload, now)?;
        WorkloadRegistry::validate(&spec)?;
        println!(
            "{}: {}..{} replicas, target {}% {}",
            spec.id,
            spec.min_replicas,
            spec.max_replicas,
            spec.target_utilization_percent,
            spec.metric
        );
    }
    println!("{} ok ({} workloads)", path.display(), config.workloads.len());
    Ok(())
}
