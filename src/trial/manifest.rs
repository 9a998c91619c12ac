use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::sampling::EndpointPair;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Completion record of one persisted trial output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub dataset: String,
    pub algorithm: String,
    pub endpoints: EndpointPair,
    pub output: PathBuf,
    pub bytes: u64,
    pub completed: bool,
}

/// Index of completed trial outputs, persisted next to them as JSON.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    entries: FxHashMap<(String, String), ManifestEntry>,
}

impl Manifest {
    /// Loads the manifest in `dir`, starting empty when it is missing or unreadable.
    pub fn load<P: AsRef<Path>>(dir: P) -> Self {
        let path = dir.as_ref().join(MANIFEST_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<ManifestEntry>>(&content) {
                Ok(entries) => entries
                    .into_iter()
                    .map(|e| ((e.dataset.clone(), e.algorithm.clone()), e))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Error parsing manifest. Starting fresh.");
                    FxHashMap::default()
                }
            },
            Err(_) => FxHashMap::default(),
        };
        debug!(path = %path.display(), entries = entries.len(), "Loaded manifest");
        Manifest { path, entries }
    }

    pub fn get(&self, dataset: &str, algorithm: &str) -> Option<&ManifestEntry> {
        self.entries.get(&(dataset.to_string(), algorithm.to_string()))
    }

    /// Records an entry and rewrites the manifest file.
    pub async fn record(&mut self, entry: ManifestEntry) -> Result<()> {
        self.entries
            .insert((entry.dataset.clone(), entry.algorithm.clone()), entry);
        self.save().await
    }

    /// Endpoints used by any completed trial of the dataset.
    pub fn endpoints_for(&self, dataset: &str) -> Option<EndpointPair> {
        let mut completed: Vec<&ManifestEntry> = self
            .entries
            .values()
            .filter(|e| e.dataset == dataset && e.completed)
            .collect();
        completed.sort_by(|a, b| a.algorithm.cmp(&b.algorithm));
        completed.first().map(|e| e.endpoints.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn save(&self) -> Result<()> {
        let mut entries: Vec<&ManifestEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| (&a.dataset, &a.algorithm).cmp(&(&b.dataset, &b.algorithm)));

        let json = serde_json::to_string_pretty(&entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
