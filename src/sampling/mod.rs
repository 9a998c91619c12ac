use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::io::BufRead;

use crate::error::{HarnessError, Result};

const COMMENT_PREFIX: char = '#';

/// The (start, end) identifiers handed to the search binary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EndpointPair {
    pub start: String,
    pub end: String,
}

/// One `source target` line of an edge list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    source: String,
    target: String,
}

/// Leading edge lines of a dataset, from which endpoints are drawn.
#[derive(Debug, Clone)]
pub struct CandidatePool {
    dataset: String,
    edges: Vec<Edge>,
}

impl CandidatePool {
    /// Reads at most `cap` edge lines, skipping comments and lines without two fields.
    pub fn from_reader<R: BufRead>(dataset: &str, reader: R, cap: usize) -> Result<Self> {
        let mut edges = Vec::with_capacity(cap.min(1024));

        for line in reader.lines() {
            if edges.len() >= cap {
                break;
            }
            let line = line?;
            if let Some(edge) = parse_edge(&line) {
                edges.push(edge);
            }
        }

        Ok(CandidatePool {
            dataset: dataset.to_string(),
            edges,
        })
    }

    pub fn from_text(dataset: &str, content: &str, cap: usize) -> Self {
        // Reading from a slice cannot fail
        Self::from_reader(dataset, content.as_bytes(), cap).unwrap_or(CandidatePool {
            dataset: dataset.to_string(),
            edges: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn distinct_sources(&self) -> usize {
        self.edges
            .iter()
            .map(|e| e.source.as_str())
            .collect::<FxHashSet<_>>()
            .len()
    }

    /// Picks a start and an end that is likely reachable from it.
    ///
    /// `end` is first drawn at random among edges with a different source,
    /// then replaced by the target of `start` when the pool shows that target
    /// leading somewhere other than back to `start`.
    pub fn select<R: Rng>(&self, rng: &mut R, max_retries: usize) -> Result<EndpointPair> {
        if self.distinct_sources() < 2 {
            return Err(self.selection_error(format!(
                "need at least 2 distinct source identifiers among {} candidate lines",
                self.edges.len()
            )));
        }

        let start = &self.edges[rng.gen_range(0..self.edges.len())];

        let mut end = None;
        for _ in 0..max_retries {
            let candidate = &self.edges[rng.gen_range(0..self.edges.len())];
            if candidate.source != start.source {
                end = Some(candidate);
                break;
            }
        }
        let mut end = match end {
            Some(edge) => edge.source.clone(),
            None => {
                return Err(self.selection_error(format!(
                    "no end distinct from {} after {} attempts",
                    start.source, max_retries
                )))
            }
        };

        // Prefer an end one hop away from start
        if let Some(hop) = self.edges.iter().find(|e| {
            e.source == start.target && e.target != start.source && e.source != start.source
        }) {
            end = hop.source.clone();
        }

        Ok(EndpointPair {
            start: start.source.clone(),
            end,
        })
    }

    fn selection_error(&self, reason: String) -> HarnessError {
        HarnessError::Selection {
            dataset: self.dataset.clone(),
            reason,
        }
    }
}

fn parse_edge(line: &str) -> Option<Edge> {
    if line.starts_with(COMMENT_PREFIX) {
        return None;
    }
    let normalized = line.replace(['\t', ','], " ");
    let mut fields = normalized.split_whitespace();
    let source = fields.next()?;
    let target = fields.next()?;
    Some(Edge {
        source: source.to_string(),
        target: target.to_string(),
    })
}

/// Random source for one dataset: seeded from `seed` and the dataset name when given.
pub fn dataset_rng(seed: Option<u64>, dataset: &str) -> StdRng {
    match seed {
        Some(seed) => {
            let mut hasher = rustc_hash::FxHasher::default();
            dataset.hash(&mut hasher);
            StdRng::seed_from_u64(seed ^ hasher.finish())
        }
        None => StdRng::from_entropy(),
    }
}
