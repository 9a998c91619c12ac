use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{HarnessError, Result};

/// A dataset file living in the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// File name inside the data directory, e.g. `roadNet-PA.txt.gz`
    pub name: String,
    pub path: PathBuf,
}

impl Dataset {
    pub fn new<P: AsRef<Path>>(data_dir: P, name: &str) -> Self {
        Dataset {
            name: name.to_string(),
            path: data_dir.as_ref().join(name),
        }
    }

    /// Name with the `.gz` and `.txt` suffixes removed, used for artifact names.
    pub fn basename(&self) -> String {
        basename(&self.name)
    }

    /// Opens the dataset as text, decompressing gzip files on the fly.
    pub fn open(&self) -> Result<Box<dyn BufRead + Send>> {
        open_dataset(&self.path)
    }
}

pub fn basename(name: &str) -> String {
    let name = name.strip_suffix(".gz").unwrap_or(name);
    let name = name.strip_suffix(".txt").unwrap_or(name);
    name.to_string()
}

/// Opens a dataset file, transparently decoding `.gz` files.
pub fn open_dataset<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let is_gzip = path.extension().map(|ext| ext == "gz").unwrap_or(false);

    if is_gzip {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Lists every dataset in the directory, smallest first.
pub fn list_datasets<P: AsRef<Path>>(dir: P) -> Result<Vec<Dataset>> {
    let dir = dir.as_ref();
    let mut sized = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        // Skip sub-directories and anything that is not valid UTF-8
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let size = entry.metadata()?.len();
        sized.push((Dataset::new(dir, name), size));
    }

    sized.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.name.cmp(&b.0.name)));
    Ok(sized.into_iter().map(|(dataset, _)| dataset).collect())
}

/// Datasets and algorithms picked from command-line tokens.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selection {
    pub datasets: Vec<String>,
    pub algorithms: Vec<String>,
}

impl Selection {
    /// Each token is an algorithm if it names a known one, a dataset otherwise.
    ///
    /// Dataset tokens may carry the data directory as a prefix (`data/foo.txt.gz`).
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S], known_algorithms: &[String], data_dir: &Path) -> Self {
        let prefix = format!("{}/", data_dir.display());
        let mut selection = Selection::default();

        for token in tokens {
            let token = token.as_ref();
            if known_algorithms.iter().any(|a| a == token) {
                if !selection.algorithms.iter().any(|a| a == token) {
                    selection.algorithms.push(token.to_string());
                }
            } else {
                let name = token.strip_prefix(&prefix).unwrap_or(token).to_string();
                if !selection.datasets.contains(&name) {
                    selection.datasets.push(name);
                }
            }
        }

        selection
    }

    /// Resolves the selection against what is available; empty sets mean "all".
    pub fn resolve(&self, available: &[Dataset], known_algorithms: &[String]) -> Result<(Vec<Dataset>, Vec<String>)> {
        let datasets = if self.datasets.is_empty() {
            available.to_vec()
        } else {
            self.datasets
                .iter()
                .map(|name| {
                    available
                        .iter()
                        .find(|d| &d.name == name)
                        .cloned()
                        .ok_or_else(|| HarnessError::UnknownDataset { name: name.clone() })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let algorithms = if self.algorithms.is_empty() {
            known_algorithms.to_vec()
        } else {
            self.algorithms.clone()
        };

        Ok((datasets, algorithms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn algorithms() -> Vec<String> {
        vec!["breadth-first".to_string(), "uniform-cost".to_string()]
    }

    #[test]
    fn test_basename_strips_known_suffixes() {
        assert_eq!(basename("roadNet-PA.txt.gz"), "roadNet-PA");
        assert_eq!(basename("email-Enron.txt"), "email-Enron");
        assert_eq!(basename("web-Google.gz"), "web-Google");
        assert_eq!(basename("graph.csv"), "graph.csv");
    }

    #[test]
    fn test_open_gzip_dataset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.txt.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"# comment\n1\t2\n").unwrap();
        encoder.finish().unwrap();

        let mut text = String::new();
        open_dataset(&path).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "# comment\n1\t2\n");
    }

    #[test]
    fn test_list_datasets_sorted_by_size() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.txt"), "1 2\n3 4\n5 6\n").unwrap();
        fs::write(dir.path().join("small.txt"), "1 2\n").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        let names: Vec<String> = list_datasets(dir.path())
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["small.txt", "big.txt"]);
    }

    #[test]
    fn test_selection_splits_tokens() {
        let tokens = ["uniform-cost", "data/roadNet-PA.txt.gz", "email-Enron.txt.gz", "uniform-cost"];
        let selection = Selection::from_tokens(&tokens[..], &algorithms(), Path::new("data"));
        assert_eq!(selection.algorithms, vec!["uniform-cost"]);
        assert_eq!(selection.datasets, vec!["roadNet-PA.txt.gz", "email-Enron.txt.gz"]);
    }

    #[test]
    fn test_empty_selection_means_everything() {
        let available = vec![Dataset::new("data", "a.txt"), Dataset::new("data", "b.txt")];
        let (datasets, algs) = Selection::default().resolve(&available, &algorithms()).unwrap();
        assert_eq!(datasets, available);
        assert_eq!(algs, algorithms());
    }

    #[test]
    fn test_unknown_dataset_is_rejected() {
        let available = vec![Dataset::new("data", "a.txt")];
        let selection = Selection {
            datasets: vec!["missing.txt".to_string()],
            algorithms: Vec::new(),
        };
        assert!(matches!(
            selection.resolve(&available, &algorithms()),
            Err(HarnessError::UnknownDataset { .. })
        ));
    }
}
