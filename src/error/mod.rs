use std::path::PathBuf;
use std::result;

use thiserror::Error;

/// Error types for the experiment harness
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A profiler line could not be interpreted
    #[error("Malformed profiler line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// The dataset does not offer enough distinct identifiers to pick endpoints from
    #[error("Cannot select endpoints for dataset {dataset}: {reason}")]
    Selection { dataset: String, reason: String },

    /// A subprocess exited with a non-zero status
    #[error("{program} exited with {status}: {stderr}")]
    Execution {
        program: String,
        status: String,
        stderr: String,
    },

    /// A subprocess succeeded but produced nothing on stdout
    #[error("{program} produced no output")]
    EmptyOutput { program: String },

    /// A subprocess ran past the configured limit and was killed
    #[error("{program} timed out after {seconds}s")]
    Timeout { program: String, seconds: u64 },

    /// A persisted result exists but cannot be trusted
    #[error("Cannot read cached output {}: {reason}", path.display())]
    CacheRead { path: PathBuf, reason: String },

    /// Execution is disabled and no persisted result exists
    #[error("No cached output at {} and execution is disabled", path.display())]
    MissingOutput { path: PathBuf },

    /// A dataset named on the command line does not exist
    #[error("Unknown dataset: {name}")]
    UnknownDataset { name: String },

    /// Rendering a plot failed
    #[error("Plot rendering failed: {reason}")]
    Plot { reason: String },

    /// Invalid harness configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Short label used for failure markers in reports
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Parse { .. } => "parse error",
            HarnessError::Selection { .. } => "selection error",
            HarnessError::Execution { .. } | HarnessError::EmptyOutput { .. } => "execution error",
            HarnessError::Timeout { .. } => "timeout",
            HarnessError::CacheRead { .. } => "cache read error",
            HarnessError::MissingOutput { .. } => "missing output",
            HarnessError::UnknownDataset { .. } => "unknown dataset",
            HarnessError::Plot { .. } => "plot error",
            HarnessError::Config(_) => "configuration error",
            HarnessError::Io(_) => "io error",
            HarnessError::Json(_) => "json error",
        }
    }
}

pub type Result<T> = result::Result<T, HarnessError>;
