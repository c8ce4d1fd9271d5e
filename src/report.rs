// src/report.rs
//
// Plain-text view of a results file, one block per record.

use std::path::Path;

use crate::dataset::{stream_records, TaskRecord};
use crate::error::DatasetError;
use crate::llm::client::preview;

const OUTPUT_PREVIEW: usize = 400;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReportTotals {
    pub records: usize,
    pub passed: usize,
}

pub fn print_report(path: &Path, full: bool) -> Result<ReportTotals, DatasetError> {
    let mut totals = ReportTotals::default();

    for record in stream_records(path)? {
        println!("{}", render(&record, full));
        println!("{}", "-".repeat(20));

        totals.records += 1;
        if record.passed == Some(true) || record.result.as_deref() == Some("passed") {
            totals.passed += 1;
        }
    }

    println!("records: {}  passed: {}", totals.records, totals.passed);
    Ok(totals)
}

fn render(r: &TaskRecord, full: bool) -> String {
    let output = r.output.as_deref().unwrap_or("");
    let output = if full {
        output.to_string()
    } else {
        preview(output, OUTPUT_PREVIEW)
    };

    let score = r
        .score
        .as_ref()
        .map(|v| v.to_string())
        .or_else(|| r.result.clone())
        .unwrap_or_else(|| "-".into());

    format!(
        "Task ID: {}\nInput: {}\nOutput: {}\nScore: {}",
        r.task_id.as_deref().unwrap_or("<missing>"),
        preview(r.input.as_deref().unwrap_or(""), 120),
        output,
        score
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn render_prefers_score_then_result() {
        let r: TaskRecord =
            serde_json::from_str(r#"{"task_id":"A","output":"x = 1","score":0.5,"result":"failed"}"#)
                .unwrap();
        let text = render(&r, false);
        assert!(text.contains("Task ID: A"));
        assert!(text.contains("Score: 0.5"));

        let r: TaskRecord = serde_json::from_str(r#"{"task_id":"B","result":"passed"}"#).unwrap();
        assert!(render(&r, false).contains("Score: passed"));
    }

    #[test]
    fn totals_count_passing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        fs::write(
            &path,
            "{\"task_id\":\"A\",\"passed\":true}\n{\"task_id\":\"B\",\"result\":\"failed: x\"}\n{\"task_id\":\"C\",\"result\":\"passed\"}\n",
        )
        .unwrap();

        let totals = print_report(&path, false).unwrap();
        assert_eq!(totals, ReportTotals { records: 3, passed: 2 });
    }
}
