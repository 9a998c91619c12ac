use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::dataset::{list_datasets, Dataset, Selection};
use crate::error::{HarnessError, Result};
use crate::extract::{extract, TrialMetadata};
use crate::massif;
use crate::plot::{plotter_for, PlotRequest, Plotter};
use crate::report::{DatasetReport, ReportAggregator, RunSummary, TrialOutcome, TrialRecord};
use crate::sampling::{dataset_rng, CandidatePool, EndpointPair};
use crate::trial::{Trial, TrialExecutor, TrialPaths, TrialRun};

/// The (dataset x algorithm) matrix of one run.
#[derive(Debug, Clone)]
pub struct ExperimentPlan {
    pub datasets: Vec<Dataset>,
    pub algorithms: Vec<String>,
}

impl ExperimentPlan {
    /// Resolves command-line tokens against the data directory and the configured algorithms.
    pub fn from_tokens<S: AsRef<str>>(config: &HarnessConfig, tokens: &[S]) -> Result<Self> {
        let selection = Selection::from_tokens(tokens, &config.algorithms, &config.data_dir);
        let available = list_datasets(&config.data_dir)?;
        let (datasets, algorithms) = selection.resolve(&available, &config.algorithms)?;
        Ok(ExperimentPlan { datasets, algorithms })
    }

    pub fn trial_count(&self) -> usize {
        self.datasets.len() * self.algorithms.len()
    }
}

/// Where a dataset worker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetStage {
    Pending,
    SelectingEndpoints,
    RunningTrials,
    Aggregating,
    Done,
}

impl fmt::Display for DatasetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DatasetStage::Pending => "pending",
            DatasetStage::SelectingEndpoints => "selecting endpoints",
            DatasetStage::RunningTrials => "running trials",
            DatasetStage::Aggregating => "aggregating",
            DatasetStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Runs the experiment matrix: one worker per dataset, a bounded number at a time.
pub struct Scheduler {
    config: Arc<HarnessConfig>,
    executor: Arc<TrialExecutor>,
    plotter: Arc<dyn Plotter>,
    plot_lock: Arc<Mutex<()>>,
    report: Arc<ReportAggregator>,
}

impl Scheduler {
    pub fn new(config: HarnessConfig) -> Self {
        let plotter: Arc<dyn Plotter> = Arc::from(plotter_for(config.plot_backend));
        Self::with_plotter(config, plotter)
    }

    pub fn with_plotter(config: HarnessConfig, plotter: Arc<dyn Plotter>) -> Self {
        Scheduler {
            executor: Arc::new(TrialExecutor::new(&config)),
            report: Arc::new(ReportAggregator::new(&config.doc_dir)),
            config: Arc::new(config),
            plotter,
            plot_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Processes every dataset of the plan and writes the report documents.
    ///
    /// Trial failures are recorded in the summary; only failing to write the
    /// report aborts the run.
    pub async fn run(&self, plan: ExperimentPlan) -> Result<RunSummary> {
        self.config.create_output_dirs()?;
        info!(
            datasets = plan.datasets.len(),
            algorithms = plan.algorithms.len(),
            trials = plan.trial_count(),
            workers = self.config.workers,
            "Starting experiments"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut handles = Vec::with_capacity(plan.datasets.len());

        for dataset in plan.datasets {
            let worker = DatasetWorker {
                config: Arc::clone(&self.config),
                executor: Arc::clone(&self.executor),
                plotter: Arc::clone(&self.plotter),
                plot_lock: Arc::clone(&self.plot_lock),
                report: Arc::clone(&self.report),
                algorithms: plan.algorithms.clone(),
                dataset: dataset.clone(),
            };
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                worker.run().await;
            });
            handles.push((dataset, handle));
        }

        for (dataset, handle) in handles {
            if let Err(e) = handle.await {
                error!(dataset = %dataset.name, error = %e, "Dataset worker aborted");
                let mut report = DatasetReport::new(&dataset.name);
                for algorithm in &plan.algorithms {
                    report.push(failed_record(&dataset, algorithm, "worker aborted", &e.to_string()));
                }
                self.report.merge(report).await;
            }
        }

        let summary = self.report.write_documents().await?;
        for failed in summary.failed() {
            if let TrialOutcome::Failed { message, .. } = &failed.outcome {
                error!(dataset = %failed.dataset, algorithm = %failed.algorithm, error = %message, "Trial failed");
            }
        }
        Ok(summary)
    }
}

fn failed_record(dataset: &Dataset, algorithm: &str, kind: &str, message: &str) -> TrialRecord {
    TrialRecord {
        dataset: dataset.name.clone(),
        algorithm: algorithm.to_string(),
        outcome: TrialOutcome::Failed {
            kind: kind.to_string(),
            message: message.to_string(),
        },
        cached: false,
        plot: None,
    }
}

struct DatasetWorker {
    config: Arc<HarnessConfig>,
    executor: Arc<TrialExecutor>,
    plotter: Arc<dyn Plotter>,
    plot_lock: Arc<Mutex<()>>,
    report: Arc<ReportAggregator>,
    algorithms: Vec<String>,
    dataset: Dataset,
}

impl DatasetWorker {
    fn enter(&self, stage: DatasetStage) {
        debug!(dataset = %self.dataset.name, stage = %stage, "Dataset stage");
    }

    async fn run(self) {
        self.enter(DatasetStage::Pending);
        let mut report = DatasetReport::new(&self.dataset.name);

        self.enter(DatasetStage::SelectingEndpoints);
        match self.endpoints().await {
            Ok(endpoints) => {
                info!(
                    dataset = %self.dataset.name,
                    start = %endpoints.start,
                    end = %endpoints.end,
                    "Selected endpoints"
                );
                self.enter(DatasetStage::RunningTrials);
                for algorithm in &self.algorithms {
                    let record = self.run_trial(algorithm, &endpoints, &mut report.metadata).await;
                    report.push(record);
                }
            }
            Err(e) => {
                error!(dataset = %self.dataset.name, error = %e, "Cannot pick endpoints");
                for algorithm in &self.algorithms {
                    report.push(failed_record(&self.dataset, algorithm, e.kind(), &e.to_string()));
                }
            }
        }

        self.enter(DatasetStage::Aggregating);
        self.report.merge(report).await;

        self.enter(DatasetStage::Done);
        info!(dataset = %self.dataset.name, "Dataset completed");
    }

    /// Reuses the endpoints of earlier trials so cached and fresh runs agree.
    async fn endpoints(&self) -> Result<EndpointPair> {
        if let Some(endpoints) = self.executor.recorded_endpoints(&self.dataset.name).await {
            debug!(dataset = %self.dataset.name, "Using endpoints from the manifest");
            return Ok(endpoints);
        }

        for algorithm in &self.algorithms {
            let paths = TrialPaths::new(&self.config, &self.dataset, algorithm, self.plotter.extension());
            let Ok(content) = tokio::fs::read_to_string(&paths.profile).await else {
                continue;
            };
            if let Some((start, end)) = massif::recover_endpoints(&content) {
                info!(dataset = %self.dataset.name, "Using previously selected endpoints");
                return Ok(EndpointPair { start, end });
            }
        }

        if !self.config.run_enabled {
            // Only cached output will be read, the pair never reaches the binary
            return Ok(EndpointPair {
                start: String::new(),
                end: String::new(),
            });
        }

        let dataset = self.dataset.clone();
        let cap = self.config.candidate_cap;
        let retries = self.config.selection_retries;
        let seed = self.config.seed;
        tokio::task::spawn_blocking(move || {
            let pool = CandidatePool::from_reader(&dataset.name, dataset.open()?, cap)?;
            let mut rng = dataset_rng(seed, &dataset.name);
            pool.select(&mut rng, retries)
        })
        .await
        .map_err(|e| HarnessError::Selection {
            dataset: self.dataset.name.clone(),
            reason: e.to_string(),
        })?
    }

    async fn run_trial(
        &self,
        algorithm: &str,
        endpoints: &EndpointPair,
        metadata: &mut TrialMetadata,
    ) -> TrialRecord {
        let trial = Trial {
            dataset: self.dataset.clone(),
            algorithm: algorithm.to_string(),
            endpoints: endpoints.clone(),
            paths: TrialPaths::new(&self.config, &self.dataset, algorithm, self.plotter.extension()),
        };

        let run = match self.executor.run(&trial).await {
            Ok(run) => run,
            Err(e) => {
                warn!(dataset = %self.dataset.name, algorithm = %algorithm, error = %e, "Trial failed");
                return failed_record(&self.dataset, algorithm, e.kind(), &e.to_string());
            }
        };

        let extraction = extract(&run.stdout, algorithm);
        metadata.merge(extraction.metadata);
        let outcome = match extraction.row {
            Some(row) => TrialOutcome::Completed(row),
            None => {
                warn!(dataset = %self.dataset.name, algorithm = %algorithm, "No result row in output");
                TrialOutcome::NoResult
            }
        };

        let plot = self.plot(&trial, &run).await;
        info!(dataset = %self.dataset.name, algorithm = %algorithm, cached = run.cached, "Trial completed");

        TrialRecord {
            dataset: self.dataset.name.clone(),
            algorithm: algorithm.to_string(),
            outcome,
            cached: run.cached,
            plot,
        }
    }

    /// Parses the profiler output and renders it while holding the plot lock.
    ///
    /// A fresh run only has a profile of its own when the profiler wrapped it.
    async fn plot(&self, trial: &Trial, run: &TrialRun) -> Option<PathBuf> {
        if !run.cached && !self.config.profiler.enabled {
            debug!(dataset = %trial.dataset.name, algorithm = %trial.algorithm, "Profiler disabled, skipping plot");
            return None;
        }
        if !trial.paths.profile.exists() {
            debug!(path = %trial.paths.profile.display(), "No profiler output, skipping plot");
            return None;
        }

        let profile = trial.paths.profile.clone();
        let snapshots = match tokio::task::spawn_blocking(move || massif::parse_file(profile)).await {
            Ok(Ok(snapshots)) => snapshots,
            Ok(Err(e)) => {
                warn!(path = %trial.paths.profile.display(), error = %e, "Cannot read profiler output");
                return None;
            }
            Err(e) => {
                warn!(path = %trial.paths.profile.display(), error = %e, "Profile parsing aborted");
                return None;
            }
        };

        let request = PlotRequest::new(&trial.algorithm, &trial.dataset.name, snapshots, trial.paths.plot.clone());
        let plotter = Arc::clone(&self.plotter);

        let _guard = self.plot_lock.lock().await;
        match tokio::task::spawn_blocking(move || plotter.render(&request)).await {
            Ok(Ok(())) => Some(trial.paths.plot.clone()),
            Ok(Err(e)) => {
                warn!(path = %trial.paths.plot.display(), error = %e, "Plot not rendered");
                None
            }
            Err(e) => {
                warn!(path = %trial.paths.plot.display(), error = %e, "Plot task aborted");
                None
            }
        }
    }
}

/// Runs the setup commands in order, stopping at the first failure.
pub async fn run_setup(commands: &[Vec<String>]) -> Result<()> {
    for command in commands {
        let Some((program, args)) = command.split_first() else {
            continue;
        };
        info!(command = %command.join(" "), "Running setup command");

        let status = Command::new(program)
            .args(args)
            .status()
            .await
            .map_err(|e| HarnessError::Execution {
                program: program.clone(),
                status: "not started".to_string(),
                stderr: e.to_string(),
            })?;

        if !status.success() {
            return Err(HarnessError::Execution {
                program: command.join(" "),
                status: status.to_string(),
                stderr: String::new(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_in(dir: &std::path::Path) -> HarnessConfig {
        HarnessConfig {
            data_dir: dir.join("data"),
            profiler_dir: dir.join("massif"),
            search_output_dir: dir.join("search_output"),
            plots_dir: dir.join("plots"),
            doc_dir: dir.join("doc"),
            search_binary: dir.join("missing-binary"),
            workers: 2,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn test_plan_from_tokens() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(&config.data_dir).unwrap();
        fs::write(config.data_dir.join("a.txt"), "1 2\n").unwrap();
        fs::write(config.data_dir.join("b.txt"), "1 2\n3 4\n").unwrap();

        let plan = ExperimentPlan::from_tokens::<&str>(&config, &[]).unwrap();
        assert_eq!(plan.trial_count(), 10);

        let plan = ExperimentPlan::from_tokens(&config, &["b.txt", "uniform-cost"][..]).unwrap();
        assert_eq!(plan.datasets.len(), 1);
        assert_eq!(plan.algorithms, vec!["uniform-cost"]);
    }

    #[tokio::test]
    async fn test_selection_failure_fails_every_trial() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(&config.data_dir).unwrap();
        fs::write(config.data_dir.join("star.txt"), "5 1\n5 2\n").unwrap();

        let plan = ExperimentPlan::from_tokens(&config, &["star.txt", "breadth-first", "uniform-cost"][..]).unwrap();
        let summary = Scheduler::new(config).run(plan).await.unwrap();

        assert_eq!(summary.trials.len(), 2);
        assert!(summary.trials.iter().all(|t| matches!(
            &t.outcome,
            TrialOutcome::Failed { kind, .. } if kind == "selection error"
        )));
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported() {
        let commands = vec![vec!["definitely-not-a-real-program-xyz".to_string()]];
        assert!(matches!(run_setup(&commands).await, Err(HarnessError::Execution { .. })));
        assert!(run_setup(&[]).await.is_ok());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(DatasetStage::SelectingEndpoints.to_string(), "selecting endpoints");
    }
}
