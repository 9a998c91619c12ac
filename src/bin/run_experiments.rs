use anyhow::{Context, Result};
use clap::Parser;
use search_benchmark_rs::config::{HarnessConfig, PlotBackend};
use search_benchmark_rs::scheduler::{run_setup, ExperimentPlan, Scheduler};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "run_experiments",
    about = "Runs every search algorithm on every dataset under the memory profiler",
    long_about = "Runs every search algorithm on every dataset under the memory profiler, \
                  plots heap usage and writes the LaTeX report. Positional tokens naming a \
                  known algorithm restrict the algorithms; any other token names a dataset."
)]
struct Cli {
    /// Datasets and algorithms to run (default: all of both)
    tokens: Vec<String>,

    /// JSON configuration file
    #[arg(short, long, env = "HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Number of datasets processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Kill a search run after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Run the search binary without the memory profiler
    #[arg(long)]
    no_profiler: bool,

    /// Only read cached output, never run the search binary
    #[arg(long)]
    no_run: bool,

    /// Plot renderer
    #[arg(long, value_enum)]
    plot_backend: Option<PlotBackend>,

    /// Seed for endpoint selection (default: random)
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the build and download steps
    #[arg(long)]
    skip_setup: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn harness_config(&self) -> Result<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::load(path)
                .with_context(|| format!("cannot load configuration {}", path.display()))?,
            None => HarnessConfig::default(),
        };
        config.apply_env();

        // Command-line flags win over the file and the environment
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.timeout.is_some() {
            config.timeout_secs = self.timeout;
        }
        if self.no_profiler {
            config.profiler.enabled = false;
        }
        if self.no_run {
            config.run_enabled = false;
        }
        if let Some(backend) = self.plot_backend {
            config.plot_backend = backend;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = cli.harness_config()?;

    // Build the search binary and fetch the datasets
    if cli.skip_setup || !config.run_enabled {
        info!("Skipping setup");
    } else {
        run_setup(&config.setup_commands).await.context("setup failed")?;
    }

    let plan = ExperimentPlan::from_tokens(&config, &cli.tokens)?;
    if plan.datasets.is_empty() {
        error!(dir = %config.data_dir.display(), "No datasets found");
        std::process::exit(1);
    }

    let summary = Scheduler::new(config).run(plan).await?;
    summary.print();

    let failed = summary.failed().count();
    if failed > 0 {
        error!(failed, total = summary.trials.len(), "Some trials failed");
        std::process::exit(1);
    }

    info!(trials = summary.trials.len(), "All trials completed");
    Ok(())
}
