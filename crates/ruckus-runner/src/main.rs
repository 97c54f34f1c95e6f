//! `ruckus` command line

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ruckus_core::{ControlApi, Orchestrator};
use ruckus_runner::logging::{self, LogFormat, DEFAULT_LOG_LEVEL};
use ruckus_runner::{output, signal, Inventory, Overrides, RunnerConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Ruckus - fault injection sessions
#[derive(Parser)]
#[command(name = "ruckus")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one chaos session
    Run(RunArgs),

    /// List built-in experiments
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Experiment to run (see `ruckus list`)
    #[arg(short, long)]
    experiment: Option<String>,

    /// TOML configuration file
    #[arg(short, long, env = "RUCKUS_CONFIG")]
    config: Option<PathBuf>,

    /// JSON target inventory; a demo inventory is used when omitted
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Explicit target names
    #[arg(long, value_delimiter = ',')]
    targets: Option<Vec<String>>,

    /// Label selector, `k=v,...`
    #[arg(long)]
    selector: Option<String>,

    /// Target namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// serial, parallel or random
    #[arg(long)]
    sequence: Option<String>,

    /// Total chaos duration in seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Interval between injections in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Share of matching targets to affect
    #[arg(long)]
    percentage: Option<u8>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            experiment: self.experiment.clone(),
            targets: self.targets.clone(),
            selector: self.selector.clone(),
            namespace: self.namespace.clone(),
            sequence: self.sequence.clone(),
            duration: self.duration,
            interval: self.interval,
            percentage: self.percentage,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, DEFAULT_LOG_LEVEL).context("failed to initialize logging")?;

    match cli.command {
        Commands::List { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&output::catalog())?);
            } else {
                println!("{}", output::catalog_text());
            }
            Ok(())
        }
        Commands::Run(args) => {
            let code = run(args).await?;
            std::process::exit(code);
        }
    }
}

async fn run(args: RunArgs) -> Result<i32> {
    let config = RunnerConfig::layered(
        args.config.as_deref(),
        |key| std::env::var(key).ok(),
        &args.overrides(),
    )
    .context("invalid configuration")?;

    let experiment = config.experiment()?;
    let session = config.session()?;
    let spec = config.target_spec(experiment.target_kind())?;

    let inventory = match &args.inventory {
        Some(path) => Inventory::from_file(path)?,
        None => Inventory::demo(),
    };
    let api: Arc<dyn ControlApi> = Arc::new(inventory.into_cluster());
    let probes = config.probes(&api, experiment.target_kind())?;

    tracing::info!(
        experiment = %experiment,
        sequence = %session.sequence,
        duration_secs = session.chaos_duration.as_secs(),
        "Starting ruckus session"
    );
    let orchestrator = Orchestrator::new(api, Arc::new(config.fault()?), session)
        .with_namespace(config.chaos_namespace.clone())
        .with_probes(Arc::new(probes));

    let report = orchestrator
        .run(&spec, signal::shutdown_signal())
        .await
        .context("chaos session failed")?;

    if args.json {
        println!("{}", output::session_json(&report)?);
    } else {
        println!("{}", output::session_text(&report));
    }
    Ok(report.exit_code())
}
