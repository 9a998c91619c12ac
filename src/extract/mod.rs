use serde::{Deserialize, Serialize};

use crate::sampling::EndpointPair;

/// Prefix of the line describing the loaded graph
pub const GRAPH_TYPE_PREFIX: &str = "Tipo di Grafo: ";
/// Prefix of the line reporting how long the dataset took to load
pub const LOAD_DURATION_PREFIX: &str = "Durata caricamento: ";
/// Prefix of the line announcing the searched endpoints
pub const ENDPOINTS_PREFIX: &str = "Inizio ricerca da: ";
const ENDPOINTS_SEPARATOR: &str = "verso: ";

const COLUMN_SEPARATOR: char = '|';

/// One row of the search binary's result table, kept verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ResultRow {
    pub algorithm: String,
    pub outcome: String,
    pub depth: String,
    pub cost: String,
    pub time: String,
}

impl ResultRow {
    fn from_line(line: &str) -> Option<Self> {
        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        let mut fields = compact.split(COLUMN_SEPARATOR).map(str::to_string);

        Some(ResultRow {
            algorithm: fields.next()?,
            outcome: fields.next()?,
            depth: fields.next()?,
            cost: fields.next()?,
            time: fields.next()?,
        })
    }
}

/// Dataset-level description printed by the search binary.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TrialMetadata {
    pub graph_type: Option<String>,
    pub load_duration: Option<String>,
    pub endpoints: Option<EndpointPair>,
}

impl TrialMetadata {
    /// Overwrites every slot that `other` has filled in.
    pub fn merge(&mut self, other: TrialMetadata) {
        if other.graph_type.is_some() {
            self.graph_type = other.graph_type;
        }
        if other.load_duration.is_some() {
            self.load_duration = other.load_duration;
        }
        if other.endpoints.is_some() {
            self.endpoints = other.endpoints;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graph_type.is_none() && self.load_duration.is_none() && self.endpoints.is_none()
    }
}

/// What one trial's stdout yielded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub row: Option<ResultRow>,
    pub metadata: TrialMetadata,
}

fn parse_endpoints(rest: &str) -> Option<EndpointPair> {
    let rest = rest.replace(ENDPOINTS_SEPARATOR, "");
    let mut fields = rest.split_whitespace();
    Some(EndpointPair {
        start: fields.next()?.to_string(),
        end: fields.next()?.to_string(),
    })
}

/// Pulls the result row for `algorithm` and the dataset description out of stdout.
pub fn extract(stdout: &str, algorithm: &str) -> Extraction {
    let mut extraction = Extraction::default();

    for line in stdout.lines() {
        if extraction.row.is_none() && line.starts_with(algorithm) {
            extraction.row = ResultRow::from_line(line);
        }

        if line.starts_with(GRAPH_TYPE_PREFIX) {
            extraction.metadata.graph_type = Some(line.to_string());
        } else if line.starts_with(LOAD_DURATION_PREFIX) {
            extraction.metadata.load_duration = Some(line.to_string());
        } else if let Some(rest) = line.strip_prefix(ENDPOINTS_PREFIX) {
            if let Some(pair) = parse_endpoints(rest) {
                extraction.metadata.endpoints = Some(pair);
            }
        }
    }

    extraction
}
