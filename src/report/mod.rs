pub mod latex;

use prettytable::{row, Table};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::extract::{ResultRow, TrialMetadata};

pub const FIGURES_FILE: &str = "figures.tex";
pub const RESULTS_FILE: &str = "results.tex";
pub const SUMMARY_FILE: &str = "results.json";

/// How a trial ended.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TrialOutcome {
    /// The search binary printed a result row
    Completed(ResultRow),
    /// The trial ran but printed no row for its algorithm
    NoResult,
    /// The trial could not be run
    Failed { kind: String, message: String },
}

impl TrialOutcome {
    pub fn label(&self) -> &str {
        match self {
            TrialOutcome::Completed(row) => &row.outcome,
            TrialOutcome::NoResult => "no result",
            TrialOutcome::Failed { .. } => "FAILED",
        }
    }
}

/// Everything the report keeps about one trial.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub dataset: String,
    pub algorithm: String,
    pub outcome: TrialOutcome,
    pub cached: bool,
    pub plot: Option<PathBuf>,
}

/// Per-dataset buffer, owned by the worker processing that dataset.
#[derive(Debug, Clone, Default)]
pub struct DatasetReport {
    pub dataset: String,
    pub metadata: TrialMetadata,
    pub records: Vec<TrialRecord>,
}

impl DatasetReport {
    pub fn new(dataset: &str) -> Self {
        DatasetReport {
            dataset: dataset.to_string(),
            ..DatasetReport::default()
        }
    }

    pub fn push(&mut self, record: TrialRecord) {
        self.records.push(record);
    }
}

/// Outcome of a whole run.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RunSummary {
    pub trials: Vec<TrialRecord>,
}

impl RunSummary {
    pub fn failed(&self) -> impl Iterator<Item = &TrialRecord> {
        self.trials
            .iter()
            .filter(|t| matches!(t.outcome, TrialOutcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Prints one table with a row per trial, grouped by dataset.
    pub fn print(&self) {
        let mut trials: Vec<&TrialRecord> = self.trials.iter().collect();
        trials.sort_by(|a, b| (&a.dataset, &a.algorithm).cmp(&(&b.dataset, &b.algorithm)));

        let mut table = Table::new();
        table.add_row(row!["Dataset", "Algorithm", "Result", "Depth", "Cost", "Time", "Cached"]);
        for trial in trials {
            let (depth, cost, time) = match &trial.outcome {
                TrialOutcome::Completed(r) => (r.depth.as_str(), r.cost.as_str(), r.time.as_str()),
                _ => ("-", "-", "-"),
            };
            let cached = if trial.cached { "yes" } else { "no" };
            table.add_row(row![
                &trial.dataset,
                &trial.algorithm,
                trial.outcome.label(),
                depth,
                cost,
                time,
                cached
            ]);
        }
        table.printstd();
    }
}

/// Process-wide report buffers shared by all dataset workers.
///
/// Each buffer has its own lock; a worker's block is appended in one piece,
/// so blocks of different datasets never interleave.
#[derive(Debug)]
pub struct ReportAggregator {
    doc_dir: PathBuf,
    figures: Mutex<String>,
    results: Mutex<String>,
    trials: Mutex<Vec<TrialRecord>>,
}

impl ReportAggregator {
    pub fn new<P: AsRef<Path>>(doc_dir: P) -> Self {
        ReportAggregator {
            doc_dir: doc_dir.as_ref().to_path_buf(),
            figures: Mutex::new(String::new()),
            results: Mutex::new(String::new()),
            trials: Mutex::new(Vec::new()),
        }
    }

    /// Appends one finished dataset to the shared buffers.
    pub async fn merge(&self, report: DatasetReport) {
        let results_block = latex::results_block(&report);
        let figures_block = latex::figures_block(&report, &self.doc_dir);

        self.results.lock().await.push_str(&results_block);
        self.figures.lock().await.push_str(&figures_block);
        self.trials.lock().await.extend(report.records);
    }

    pub async fn figures_document(&self) -> String {
        let body = self.figures.lock().await;
        format!("{}{}{}", latex::FIGURES_PREAMBLE, body, latex::FIGURES_END)
    }

    pub async fn results_document(&self) -> String {
        self.results.lock().await.clone()
    }

    pub async fn summary(&self) -> RunSummary {
        RunSummary {
            trials: self.trials.lock().await.clone(),
        }
    }

    /// Writes the figures and results documents plus the JSON summary into the doc directory.
    pub async fn write_documents(&self) -> Result<RunSummary> {
        fs::create_dir_all(&self.doc_dir)?;
        fs::write(self.doc_dir.join(FIGURES_FILE), self.figures_document().await)?;
        fs::write(self.doc_dir.join(RESULTS_FILE), self.results_document().await)?;

        let summary = self.summary().await;
        summary.save(self.doc_dir.join(SUMMARY_FILE))?;
        info!(dir = %self.doc_dir.display(), trials = summary.trials.len(), "Report written");
        Ok(summary)
    }
}
