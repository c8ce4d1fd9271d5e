// src/dataset.rs
//
// Task records read from JSON lines. Only iteration is provided; file
// discovery and encoding sniffing are left to whoever produced the file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::DatasetError;

/// Substituted when a task carries no test specification.
pub const PLACEHOLDER_TESTS: &str = "# no test cases provided\n";

/// One raw input line. Problem files and baseline result files share it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub score: Option<Value>,
}

/// Immutable unit of work for the repair loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub tests: String,
    pub candidate: Option<String>,
    /// Upstream evaluation already marked this candidate as passing.
    pub upstream_passed: bool,
}

impl Task {
    /// `None` when the record lacks an id or a prompt.
    pub fn from_record(r: &TaskRecord) -> Option<Task> {
        let id = r.task_id.as_deref().filter(|s| !s.trim().is_empty())?;
        let prompt = r.prompt.as_deref().filter(|s| !s.trim().is_empty())?;

        let tests = non_empty(r.input.as_deref())
            .or(non_empty(r.test.as_deref()))
            .unwrap_or(PLACEHOLDER_TESTS);

        let candidate = r
            .output
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string);

        Some(Task {
            id: id.to_string(),
            prompt: prompt.to_string(),
            tests: tests.to_string(),
            candidate,
            upstream_passed: r.result.as_deref() == Some("passed") || r.passed == Some(true),
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Streams records, skipping blank lines. Lines that fail to parse or are
/// not UTF-8 are logged and skipped; an I/O error ends the stream.
pub struct Records {
    path: PathBuf,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line_no: usize,
}

impl Iterator for Records {
    type Item = TaskRecord;

    fn next(&mut self) -> Option<TaskRecord> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    let e = DatasetError::Read {
                        path: self.path.clone(),
                        source: e,
                    };
                    warn!(line = self.line_no + 1, error = %e, "stopping dataset read");
                    return None;
                }
            }
            self.line_no += 1;

            let line = match std::str::from_utf8(&self.buf) {
                Ok(l) => l,
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = self.line_no,
                        error = %e,
                        "skipping non-UTF-8 record"
                    );
                    continue;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<TaskRecord>(line) {
                Ok(r) => return Some(r),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = self.line_no,
                    error = %e,
                    "skipping unparsable record"
                ),
            }
        }
    }
}

pub fn stream_records(path: &Path) -> Result<Records, DatasetError> {
    let file = File::open(path).map_err(|source| DatasetError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(Records {
        path: path.to_path_buf(),
        reader: BufReader::new(file),
        buf: Vec::new(),
        line_no: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn record(json: &str) -> TaskRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn baseline_result_record_maps_to_task() {
        let t = Task::from_record(&record(
            r#"{"task_id":"T1","prompt":"p","input":"assert f(1)==1","output":"def f(x): return x","result":"failed: x","passed":false}"#,
        ))
        .unwrap();
        assert_eq!(t.id, "T1");
        assert_eq!(t.tests, "assert f(1)==1");
        assert_eq!(t.candidate.as_deref(), Some("def f(x): return x"));
        assert!(!t.upstream_passed);
    }

    #[test]
    fn upstream_pass_from_either_marker() {
        let a = record(r#"{"task_id":"A","prompt":"p","result":"passed"}"#);
        let b = record(r#"{"task_id":"B","prompt":"p","passed":true}"#);
        assert!(Task::from_record(&a).unwrap().upstream_passed);
        assert!(Task::from_record(&b).unwrap().upstream_passed);
    }

    #[test]
    fn missing_tests_get_placeholder_and_test_field_is_fallback() {
        let t = Task::from_record(&record(r#"{"task_id":"A","prompt":"p","input":""}"#)).unwrap();
        assert_eq!(t.tests, PLACEHOLDER_TESTS);
        assert!(t.candidate.is_none());

        let t = Task::from_record(&record(r#"{"task_id":"A","prompt":"p","test":"assert 1"}"#)).unwrap();
        assert_eq!(t.tests, "assert 1");
    }

    #[test]
    fn empty_input_falls_through_to_test_field() {
        let t = Task::from_record(&record(
            r#"{"task_id":"A","prompt":"p","input":"","test":"assert f(1)==1"}"#,
        ))
        .unwrap();
        assert_eq!(t.tests, "assert f(1)==1");
    }

    #[test]
    fn records_without_id_or_prompt_are_rejected() {
        assert!(Task::from_record(&record(r#"{"prompt":"p"}"#)).is_none());
        assert!(Task::from_record(&record(r#"{"task_id":"A","prompt":"  "}"#)).is_none());
    }

    #[test]
    fn stream_skips_blank_and_broken_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        fs::write(
            &path,
            "{\"task_id\":\"A\",\"prompt\":\"p\"}\n\n{broken\n{\"task_id\":\"B\",\"prompt\":\"q\"}\n",
        )
        .unwrap();

        let ids: Vec<_> = stream_records(&path)
            .unwrap()
            .filter_map(|r| r.task_id)
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn non_utf8_line_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.jsonl");
        let mut bytes = b"{\"task_id\":\"A\",\"prompt\":\"p\"}\n".to_vec();
        bytes.extend_from_slice(b"{\"task_id\":\"B\",\"prompt\":\"\xff\"}\n");
        bytes.extend_from_slice(b"{\"task_id\":\"C\",\"prompt\":\"q\"}");
        fs::write(&path, bytes).unwrap();

        let ids: Vec<_> = stream_records(&path)
            .unwrap()
            .filter_map(|r| r.task_id)
            .collect();
        assert_eq!(ids, vec!["A", "C"]);
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let err = stream_records(Path::new("/nonexistent/in.jsonl")).err().unwrap();
        assert!(matches!(err, DatasetError::Open { .. }));
    }
}
