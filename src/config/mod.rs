use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HarnessError, Result};

/// Search algorithms understood by the search binary.
pub const DEFAULT_ALGORITHMS: [&str; 5] = [
    "breadth-first",
    "uniform-cost",
    "depth-limited",
    "iterative-deepening",
    "bi-directional",
];

/// Number of leading dataset lines scanned when picking endpoints
pub const DEFAULT_CANDIDATE_CAP: usize = 500;

/// Attempts allowed for drawing an end identifier distinct from the start
pub const DEFAULT_SELECTION_RETRIES: usize = 1000;

/// Which plot renderer to use.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlotBackend {
    /// Pipe the series into `gnuplot` and write a PNG
    #[default]
    Gnuplot,
    /// Write an SVG chart directly
    Svg,
}

/// How the memory profiler wraps the search binary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProfilerConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    /// Flag prefix immediately followed by the output path, e.g. `--massif-out-file=`
    pub output_flag: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        ProfilerConfig {
            enabled: true,
            program: "valgrind".to_string(),
            args: vec!["--tool=massif".to_string(), "--time-unit=ms".to_string()],
            output_flag: "--massif-out-file=".to_string(),
        }
    }
}

/// Settings for one harness run.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HarnessConfig {
    pub data_dir: PathBuf,
    pub profiler_dir: PathBuf,
    pub search_output_dir: PathBuf,
    pub plots_dir: PathBuf,
    pub doc_dir: PathBuf,
    pub search_binary: PathBuf,
    pub algorithms: Vec<String>,
    pub profiler: ProfilerConfig,
    /// When false, trials are only ever loaded from persisted output
    pub run_enabled: bool,
    /// Maximum number of datasets processed at the same time
    pub workers: usize,
    /// Per-subprocess limit, unlimited when absent
    pub timeout_secs: Option<u64>,
    pub candidate_cap: usize,
    pub selection_retries: usize,
    pub seed: Option<u64>,
    pub plot_backend: PlotBackend,
    /// Commands that must succeed before any trial runs
    pub setup_commands: Vec<Vec<String>>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        HarnessConfig {
            data_dir: PathBuf::from("data"),
            profiler_dir: PathBuf::from("massif"),
            search_output_dir: PathBuf::from("search_output"),
            plots_dir: PathBuf::from("plots"),
            doc_dir: PathBuf::from("doc"),
            search_binary: PathBuf::from("./target/release/eia"),
            algorithms: DEFAULT_ALGORITHMS.iter().map(|s| s.to_string()).collect(),
            profiler: ProfilerConfig::default(),
            run_enabled: true,
            workers,
            timeout_secs: None,
            candidate_cap: DEFAULT_CANDIDATE_CAP,
            selection_retries: DEFAULT_SELECTION_RETRIES,
            seed: None,
            plot_backend: PlotBackend::default(),
            setup_commands: vec![
                vec!["cargo".into(), "build".into(), "--release".into()],
                vec!["bash".into(), "./download-datasets.sh".into(), "data".into()],
            ],
        }
    }
}

impl HarnessConfig {
    /// Loads a configuration from a JSON file; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: HarnessConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Applies the `RUN_ENABLED` and `VALGRIND_ENABLED` environment switches.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("RUN_ENABLED") {
            self.run_enabled = value.trim().eq_ignore_ascii_case("true");
        }
        if let Some(value) = lookup("VALGRIND_ENABLED") {
            self.profiler.enabled = value.trim().eq_ignore_ascii_case("true");
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HarnessError::Config("workers must be at least 1".into()));
        }
        if self.candidate_cap == 0 {
            return Err(HarnessError::Config("candidate_cap must be at least 1".into()));
        }
        if self.selection_retries == 0 {
            return Err(HarnessError::Config("selection_retries must be at least 1".into()));
        }
        if self.algorithms.is_empty() {
            return Err(HarnessError::Config("no algorithms configured".into()));
        }
        if self.profiler.enabled && self.profiler.program.is_empty() {
            return Err(HarnessError::Config("profiler enabled without a program".into()));
        }
        Ok(())
    }

    /// Creates every output directory the run writes into.
    pub fn create_output_dirs(&self) -> Result<()> {
        for dir in [
            &self.profiler_dir,
            &self.search_output_dir,
            &self.plots_dir,
            &self.doc_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
