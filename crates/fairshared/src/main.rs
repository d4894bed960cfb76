//! fairshared — the fairshare round driver.
//!
//! Single binary that assembles a whole cluster in one process:
//! - Cluster configuration (file + flags)
//! - Coordinator publishing random job batches
//! - N workers bidding, allocating, and delegating over an in-process mesh
//! - Run summary (table or JSON)
//!
//! # Usage
//!
//! ```text
//! fairshared run --workers 6 --rounds 3 --slots 5 --units 30
//! fairshared run --config fairshare.toml --output json
//! fairshared config --config fairshare.toml
//! ```

mod simulate;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fairshare_core::ClusterConfig;
use tracing_subscriber::EnvFilter;

use crate::simulate::OutputFormat;

#[derive(Parser)]
#[command(name = "fairshared", about = "fairshare round driver")]
struct Cli {
    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator and every worker in-process.
    Run {
        #[command(flatten)]
        cluster: ClusterArgs,

        /// Summary format written to stdout.
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Print the effective configuration as TOML.
    Config {
        #[command(flatten)]
        cluster: ClusterArgs,
    },
}

#[derive(Debug, Args)]
struct ClusterArgs {
    /// Path to a fairshare.toml. Flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of workers.
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    /// Number of job batches to publish.
    #[arg(long, short = 'r')]
    rounds: Option<u64>,

    /// Size of the slot pool.
    #[arg(long, short = 's')]
    slots: Option<u64>,

    /// Size of the unit pool.
    #[arg(long, short = 'p')]
    units: Option<u64>,

    /// Smallest job demand.
    #[arg(long, short = 'l')]
    min_demand: Option<u64>,

    /// Largest job demand.
    #[arg(long, short = 'u')]
    max_demand: Option<u64>,

    /// Simulated milliseconds of work per demand unit.
    #[arg(long)]
    unit_millis: Option<u64>,

    /// Seed for reproducible job batches.
    #[arg(long)]
    seed: Option<u64>,
}

impl ClusterArgs {
    /// Defaults, then the config file, then flags; validated.
    fn load(&self) -> anyhow::Result<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_file(path)?,
            None => ClusterConfig::default(),
        };

        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(slots) = self.slots {
            config.pools.slots = slots;
        }
        if let Some(units) = self.units {
            config.pools.units = units;
        }
        if let Some(min) = self.min_demand {
            config.jobs.min_demand = min;
        }
        if let Some(max) = self.max_demand {
            config.jobs.max_demand = max;
        }
        if let Some(millis) = self.unit_millis {
            config.execution.unit_millis = millis;
        }
        if let Some(seed) = self.seed {
            config.jobs.seed = Some(seed);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fairshare_sched=debug,fairshared=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { cluster, output } => {
            let config = cluster.load()?;
            simulate::run_simulation(&config, output).await
        }
        Command::Config { cluster } => {
            let config = cluster.load()?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
