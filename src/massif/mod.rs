use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::trace;

use crate::error::{HarnessError, Result};

/// Line prefix that opens a new snapshot record
pub const SNAPSHOT_MARKER: &str = "snapshot=";

const TIME_KEY: &str = "time";
const HEAP_KEY: &str = "mem_heap_B";
const HEAP_EXTRA_KEY: &str = "mem_heap_extra_B";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const MS_PER_SECOND: f64 = 1000.0;

/// One memory sample, in seconds and megabytes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub time: f64,
    pub heap_mb: f64,
    pub heap_extra_mb: f64,
}

/// Raw values of a record while it is being read.
#[derive(Debug, Default, Clone, Copy)]
struct RawSnapshot {
    time_ms: u64,
    heap_bytes: u64,
    heap_extra_bytes: u64,
}

impl RawSnapshot {
    fn set(&mut self, key: &str, value: u64) {
        match key {
            TIME_KEY => self.time_ms = value,
            HEAP_KEY => self.heap_bytes = value,
            HEAP_EXTRA_KEY => self.heap_extra_bytes = value,
            _ => {}
        }
    }

    fn normalize(self) -> Snapshot {
        Snapshot {
            time: self.time_ms as f64 / MS_PER_SECOND,
            heap_mb: self.heap_bytes as f64 / BYTES_PER_MB,
            heap_extra_mb: self.heap_extra_bytes as f64 / BYTES_PER_MB,
        }
    }
}

fn is_tracked(key: &str) -> bool {
    matches!(key, TIME_KEY | HEAP_KEY | HEAP_EXTRA_KEY)
}

/// Interprets a `key=value` line.
///
/// Returns `Ok(None)` for lines that carry nothing the parser keeps, and an
/// error for a tracked key whose value is not a non-negative integer.
fn parse_line(line: &str, line_number: usize) -> Result<Option<(&str, u64)>> {
    let mut parts = line.split('=');
    let (key, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => (key.trim(), value.trim()),
        _ => return Ok(None),
    };

    let is_integer = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
    if !is_integer {
        if is_tracked(key) {
            return Err(HarnessError::Parse {
                line: line_number,
                reason: format!("value of {} is not an integer: {:?}", key, value),
            });
        }
        return Ok(None);
    }

    match value.parse::<u64>() {
        Ok(parsed) => Ok(Some((key, parsed))),
        Err(e) => Err(HarnessError::Parse {
            line: line_number,
            reason: format!("value of {} out of range: {}", key, e),
        }),
    }
}

/// Parses profiler output into its ordered sequence of snapshots.
pub fn parse_snapshots<R: BufRead>(mut reader: R) -> Result<Vec<Snapshot>> {
    let mut records = Vec::new();
    let mut current: Option<RawSnapshot> = None;
    let mut buf = Vec::new();
    let mut index = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        index += 1;

        // Heap-tree lines carry symbol names that need not be UTF-8
        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.trim_end_matches(['\n', '\r']);

        if line.starts_with(SNAPSHOT_MARKER) {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(RawSnapshot::default());
            continue;
        }

        // Header lines before the first snapshot belong to no record
        let Some(record) = current.as_mut() else {
            continue;
        };

        match parse_line(line, index) {
            Ok(Some((key, value))) => record.set(key, value),
            Ok(None) => {}
            Err(e) => trace!(error = %e, "Skipping profiler line"),
        }
    }

    // Flush the trailing record
    if let Some(done) = current {
        records.push(done);
    }

    Ok(records.into_iter().map(RawSnapshot::normalize).collect())
}

/// Parses profiler output held in memory.
pub fn parse_str(content: &str) -> Vec<Snapshot> {
    // Reading from a slice cannot fail
    parse_snapshots(content.as_bytes()).unwrap_or_default()
}

/// Parses a profiler output file.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Snapshot>> {
    let file = File::open(path)?;
    parse_snapshots(BufReader::new(file))
}

/// Finds the `-i`/`-f` endpoints in the profiler's `cmd:` header line.
pub fn recover_endpoints(content: &str) -> Option<(String, String)> {
    let cmd = content
        .lines()
        .find_map(|line| line.strip_prefix("cmd:"))?;

    let mut start = None;
    let mut end = None;
    let mut tokens = cmd.split_whitespace();
    while let Some(token) = tokens.next() {
        match token {
            "-i" => start = tokens.next().map(str::to_string),
            "-f" => end = tokens.next().map(str::to_string),
            _ => {}
        }
    }

    Some((start?, end?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SNAPSHOTS: &str = "snapshot=0\ntime=100\nmem_heap_B=2097152\nmem_heap_extra_B=0\nsnapshot=1\ntime=500\nmem_heap_B=4194304\nmem_heap_extra_B=1048576\n";

    #[test]
    fn test_two_snapshots() {
        let snapshots = parse_str(TWO_SNAPSHOTS);
        assert_eq!(
            snapshots,
            vec![
                Snapshot { time: 0.1, heap_mb: 2.0, heap_extra_mb: 0.0 },
                Snapshot { time: 0.5, heap_mb: 4.0, heap_extra_mb: 1.0 },
            ]
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_str("").is_empty());
    }

    #[test]
    fn test_unterminated_record_is_flushed() {
        let snapshots = parse_str("snapshot=0\ntime=2000");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].time, 2.0);
    }

    #[test]
    fn test_count_matches_boundaries() {
        let input = "desc: --time-unit=ms\ncmd: ./eia -F x\nsnapshot=0\nsnapshot=1\n#-----------\nsnapshot=2\nheap_tree=empty\n";
        assert_eq!(parse_str(input).len(), 3);
    }

    #[test]
    fn test_missing_keys_stay_zero() {
        let snapshots = parse_str("snapshot=0\nmem_heap_B=1048576\n");
        assert_eq!(snapshots[0], Snapshot { time: 0.0, heap_mb: 1.0, heap_extra_mb: 0.0 });
    }

    #[test]
    fn test_bad_values_are_skipped() {
        let input = "snapshot=0\ntime=300\ntime=abc\nmem_heap_B=-5\nmem_heap_extra_B = 2097152 \na=b=c\n";
        let snapshots = parse_str(input);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].time, 0.3);
        assert_eq!(snapshots[0].heap_mb, 0.0);
        assert_eq!(snapshots[0].heap_extra_mb, 2.0);
    }

    #[test]
    fn test_later_value_overwrites() {
        let snapshots = parse_str("snapshot=0\ntime=1000\ntime=3000\n");
        assert_eq!(snapshots[0].time, 3.0);
    }

    #[test]
    fn test_parse_line_reports_tracked_garbage() {
        assert!(matches!(
            parse_line("time=12ms", 7),
            Err(HarnessError::Parse { line: 7, .. })
        ));
        assert!(matches!(parse_line("heap_tree=peak", 1), Ok(None)));
    }

    #[test]
    fn test_non_utf8_heap_tree_line_is_skipped() {
        let mut content = b"snapshot=0\ntime=100\nmem_heap_B=2097152\n".to_vec();
        content.extend_from_slice(b"n1: 2097152 0x10A: foo (bar\xff.rs:1)\n");
        content.extend_from_slice(b"snapshot=1\r\ntime=500\r\nmem_heap_B=4194304\r\n");

        let snapshots = parse_snapshots(&content[..]).unwrap();
        assert_eq!(
            snapshots,
            vec![
                Snapshot { time: 0.1, heap_mb: 2.0, heap_extra_mb: 0.0 },
                Snapshot { time: 0.5, heap_mb: 4.0, heap_extra_mb: 0.0 },
            ]
        );
    }

    #[test]
    fn test_reparse_is_identical() {
        assert_eq!(parse_str(TWO_SNAPSHOTS), parse_str(TWO_SNAPSHOTS));
    }

    #[test]
    fn test_recover_endpoints() {
        let content = "desc: --time-unit=ms\ncmd: ./target/release/eia -F data/roadNet-PA.txt.gz -i 12 -f 99 -r breadth-first\ntime_unit: ms\n";
        assert_eq!(
            recover_endpoints(content),
            Some(("12".to_string(), "99".to_string()))
        );
        assert_eq!(recover_endpoints("cmd: ./eia -F x"), None);
    }
}
