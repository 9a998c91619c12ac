pub mod manifest;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{HarnessConfig, ProfilerConfig};
use crate::dataset::Dataset;
use crate::error::{HarnessError, Result};
use crate::sampling::EndpointPair;
use manifest::{Manifest, ManifestEntry};

/// Number of trailing stderr lines kept in execution errors
const STDERR_TAIL_LINES: usize = 5;

/// Where the artifacts of one trial live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialPaths {
    /// Persisted stdout of the search binary
    pub output: PathBuf,
    /// Raw profiler output
    pub profile: PathBuf,
    /// Rendered memory plot
    pub plot: PathBuf,
}

impl TrialPaths {
    pub fn new(config: &HarnessConfig, dataset: &Dataset, algorithm: &str, plot_extension: &str) -> Self {
        let stem = format!("{}_{}", dataset.basename(), algorithm);
        TrialPaths {
            output: config.search_output_dir.join(format!("{}.txt", stem)),
            profile: config.profiler_dir.join(&stem),
            plot: config.plots_dir.join(format!("{}.{}", stem, plot_extension)),
        }
    }
}

/// One run of one algorithm against one dataset.
#[derive(Debug, Clone)]
pub struct Trial {
    pub dataset: Dataset,
    pub algorithm: String,
    pub endpoints: EndpointPair,
    pub paths: TrialPaths,
}

/// Stdout of a trial and whether it came from a previous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialRun {
    pub stdout: String,
    pub cached: bool,
}

/// Runs trials through the search binary, reusing persisted output when possible.
pub struct TrialExecutor {
    search_binary: PathBuf,
    profiler: ProfilerConfig,
    run_enabled: bool,
    timeout: Option<Duration>,
    manifest: Mutex<Manifest>,
}

impl TrialExecutor {
    pub fn new(config: &HarnessConfig) -> Self {
        TrialExecutor {
            search_binary: config.search_binary.clone(),
            profiler: config.profiler.clone(),
            run_enabled: config.run_enabled,
            timeout: config.timeout(),
            manifest: Mutex::new(Manifest::load(&config.search_output_dir)),
        }
    }

    /// Endpoints recorded for an earlier completed trial of the dataset.
    pub async fn recorded_endpoints(&self, dataset: &str) -> Option<EndpointPair> {
        self.manifest.lock().await.endpoints_for(dataset)
    }

    /// Builds `[profiler ...] <binary> -F <dataset> -i <start> -f <end> -r <algorithm>`.
    pub fn command(&self, trial: &Trial) -> Command {
        let mut cmd = if self.profiler.enabled {
            let mut cmd = Command::new(&self.profiler.program);
            cmd.args(&self.profiler.args)
                .arg(format!("{}{}", self.profiler.output_flag, trial.paths.profile.display()))
                .arg(&self.search_binary);
            cmd
        } else {
            Command::new(&self.search_binary)
        };

        cmd.arg("-F")
            .arg(&trial.dataset.path)
            .arg("-i")
            .arg(&trial.endpoints.start)
            .arg("-f")
            .arg(&trial.endpoints.end)
            .arg("-r")
            .arg(&trial.algorithm);
        cmd
    }

    fn program_name(&self) -> String {
        if self.profiler.enabled {
            self.profiler.program.clone()
        } else {
            self.search_binary.display().to_string()
        }
    }

    /// Returns the trial's stdout, executing the search binary only on a cache miss.
    pub async fn run(&self, trial: &Trial) -> Result<TrialRun> {
        match self.load_cached(trial).await {
            Ok(Some(stdout)) => {
                debug!(dataset = %trial.dataset.name, algorithm = %trial.algorithm, "Cache hit");
                return Ok(TrialRun { stdout, cached: true });
            }
            Ok(None) => {
                debug!(dataset = %trial.dataset.name, algorithm = %trial.algorithm, "Cache miss");
            }
            Err(e) => {
                warn!(error = %e, "Cached output rejected, re-running trial");
            }
        }

        if !self.run_enabled {
            return Err(HarnessError::MissingOutput {
                path: trial.paths.output.clone(),
            });
        }

        let stdout = self.execute(trial).await?;
        self.persist(trial, &stdout).await?;
        Ok(TrialRun { stdout, cached: false })
    }

    async fn load_cached(&self, trial: &Trial) -> Result<Option<String>> {
        let path = &trial.paths.output;
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(cache_error(path, e.to_string())),
        };
        let stdout = String::from_utf8(bytes).map_err(|e| cache_error(path, e.to_string()))?;

        // Files from runs that predate the manifest are taken as they are
        let manifest = self.manifest.lock().await;
        match manifest.get(&trial.dataset.name, &trial.algorithm) {
            Some(entry) if !entry.completed => Err(cache_error(path, "trial never completed".into())),
            Some(entry) if entry.bytes != stdout.len() as u64 => Err(cache_error(
                path,
                format!("expected {} bytes, found {}", entry.bytes, stdout.len()),
            )),
            _ => Ok(Some(stdout)),
        }
    }

    async fn execute(&self, trial: &Trial) -> Result<String> {
        let program = self.program_name();
        let mut cmd = self.command(trial);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            dataset = %trial.dataset.name,
            algorithm = %trial.algorithm,
            start = %trial.endpoints.start,
            end = %trial.endpoints.end,
            "Running trial"
        );

        // A profile left by an earlier run must not pass for this one
        if self.profiler.enabled {
            match fs::remove_file(&trial.paths.profile).await {
                Ok(()) => debug!(path = %trial.paths.profile.display(), "Removed stale profiler output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let child = cmd.spawn().map_err(|e| HarnessError::Execution {
            program: program.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;

        // Dropping the child on timeout kills it
        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(output) => output?,
                Err(_) => {
                    return Err(HarnessError::Timeout {
                        program,
                        seconds: limit.as_secs(),
                    })
                }
            },
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            return Err(HarnessError::Execution {
                program,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(HarnessError::EmptyOutput { program });
        }
        Ok(stdout)
    }

    async fn persist(&self, trial: &Trial, stdout: &str) -> Result<()> {
        let path = &trial.paths.output;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write then rename so a partial file never sits at the output path
        let tmp = path.with_extension("txt.tmp");
        fs::write(&tmp, stdout).await?;
        fs::rename(&tmp, path).await?;

        self.manifest.lock().await.record(ManifestEntry {
            dataset: trial.dataset.name.clone(),
            algorithm: trial.algorithm.clone(),
            endpoints: trial.endpoints.clone(),
            output: path.clone(),
            bytes: stdout.len() as u64,
            completed: true,
        })
        .await
    }
}

fn cache_error(path: &Path, reason: String) -> HarnessError {
    HarnessError::CacheRead {
        path: path.to_path_buf(),
        reason,
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> HarnessConfig {
        HarnessConfig {
            data_dir: dir.join("data"),
            profiler_dir: dir.join("massif"),
            search_output_dir: dir.join("search_output"),
            plots_dir: dir.join("plots"),
            doc_dir: dir.join("doc"),
            search_binary: dir.join("missing-binary"),
            ..HarnessConfig::default()
        }
    }

    fn trial(config: &HarnessConfig) -> Trial {
        let dataset = Dataset::new(&config.data_dir, "roadNet-PA.txt.gz");
        let paths = TrialPaths::new(config, &dataset, "breadth-first", "png");
        Trial {
            dataset,
            algorithm: "breadth-first".to_string(),
            endpoints: EndpointPair { start: "46".into(), end: "73".into() },
            paths,
        }
    }

    fn args(cmd: &Command) -> Vec<String> {
        let std_cmd = cmd.as_std();
        std::iter::once(std_cmd.get_program())
            .chain(std_cmd.get_args())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_paths_follow_naming_scheme() {
        let config = HarnessConfig::default();
        let trial = trial(&config);
        assert_eq!(trial.paths.output, PathBuf::from("search_output/roadNet-PA_breadth-first.txt"));
        assert_eq!(trial.paths.profile, PathBuf::from("massif/roadNet-PA_breadth-first"));
        assert_eq!(trial.paths.plot, PathBuf::from("plots/roadNet-PA_breadth-first.png"));
    }

    #[tokio::test]
    async fn test_command_with_profiler() {
        let dir = TempDir::new().unwrap();
        let config = HarnessConfig {
            search_binary: PathBuf::from("./target/release/eia"),
            ..config_in(dir.path())
        };
        let trial = trial(&config);
        let executor = TrialExecutor::new(&config);

        let argv = args(&executor.command(&trial));
        let profile_flag = format!("--massif-out-file={}", trial.paths.profile.display());
        let dataset_path = trial.dataset.path.display().to_string();
        assert_eq!(
            argv,
            vec![
                "valgrind",
                "--tool=massif",
                "--time-unit=ms",
                profile_flag.as_str(),
                "./target/release/eia",
                "-F",
                dataset_path.as_str(),
                "-i",
                "46",
                "-f",
                "73",
                "-r",
                "breadth-first",
            ]
        );
    }

    #[tokio::test]
    async fn test_command_without_profiler() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.profiler.enabled = false;
        let executor = TrialExecutor::new(&config);

        let argv = args(&executor.command(&trial(&config)));
        assert_eq!(argv[0], config.search_binary.display().to_string());
        assert_eq!(argv[1], "-F");
        assert_eq!(argv.len(), 9);
    }

    #[tokio::test]
    async fn test_cache_hit_returns_file_verbatim() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        let trial = trial(&config);
        std::fs::create_dir_all(&config.search_output_dir).unwrap();
        let content = "Tipo di Grafo: Orientato\nbreadth-first |Trovato|1|1|0.1s\n";
        std::fs::write(&trial.paths.output, content).unwrap();

        // The binary does not exist, so any execution attempt would fail
        let executor = TrialExecutor::new(&config);
        let run = executor.run(&trial).await.unwrap();
        assert!(run.cached);
        assert_eq!(run.stdout, content);
    }

    #[tokio::test]
    async fn test_missing_output_when_execution_disabled() {
        let dir = TempDir::new().unwrap();
        let config = HarnessConfig {
            run_enabled: false,
            ..config_in(dir.path())
        };
        let executor = TrialExecutor::new(&config);
        assert!(matches!(
            executor.run(&trial(&config)).await,
            Err(HarnessError::MissingOutput { .. })
        ));
    }

    #[tokio::test]
    async fn test_truncated_output_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let config = HarnessConfig {
            run_enabled: false,
            ..config_in(dir.path())
        };
        let trial = trial(&config);
        std::fs::create_dir_all(&config.search_output_dir).unwrap();
        std::fs::write(&trial.paths.output, "partial").unwrap();

        let mut manifest = Manifest::load(&config.search_output_dir);
        manifest
            .record(ManifestEntry {
                dataset: trial.dataset.name.clone(),
                algorithm: trial.algorithm.clone(),
                endpoints: trial.endpoints.clone(),
                output: trial.paths.output.clone(),
                bytes: 1000,
                completed: true,
            })
            .await
            .unwrap();

        let executor = TrialExecutor::new(&config);
        assert!(matches!(
            executor.load_cached(&trial).await,
            Err(HarnessError::CacheRead { .. })
        ));
        assert!(matches!(
            executor.run(&trial).await,
            Err(HarnessError::MissingOutput { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_execution_error() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(dir.path());
        config.profiler.enabled = false;
        let executor = TrialExecutor::new(&config);
        assert!(matches!(
            executor.run(&trial(&config)).await,
            Err(HarnessError::Execution { .. })
        ));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = b"1\n2\n\n3\n4\n5\n6\n7\n";
        assert_eq!(stderr_tail(stderr), "3\n4\n5\n6\n7");
    }
}
