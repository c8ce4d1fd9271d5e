// src/ledger.rs
//
// Append-only JSONL stores: the deduplicated sample ledger and the
// per-attempt debug trace.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::LedgerError;

/// Terminal record for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub task_id: String,
    /// Test specification.
    #[serde(rename = "input")]
    pub tests: String,
    pub prompt: String,
    /// Final candidate.
    #[serde(rename = "output")]
    pub code: String,
}

/// One tested candidate, written before its test runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub run_id: String,
    pub task_id: String,
    pub attempt: u32,
    #[serde(rename = "input")]
    pub tests: String,
    pub prompt: String,
    #[serde(rename = "output")]
    pub code: String,
    pub output_sha256: String,
    pub recorded_at: String,
}

impl AttemptRecord {
    pub fn new(run_id: &str, attempt: u32, sample: &Sample) -> Self {
        Self {
            run_id: run_id.to_string(),
            task_id: sample.task_id.clone(),
            attempt,
            tests: sample.tests.clone(),
            prompt: sample.prompt.clone(),
            code: sample.code.clone(),
            output_sha256: fingerprint(&sample.code),
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Written,
    /// First write wins; the existing entry is left alone.
    Duplicate,
    /// Whitespace-only candidate; nothing written.
    Empty,
}

#[derive(Deserialize)]
struct LedgerKey {
    task_id: String,
}

/// At most one sample per task id. The id index is rebuilt from the file
/// once at open; afterwards membership is answered from memory.
pub struct Ledger {
    path: PathBuf,
    ids: HashSet<String>,
}

impl Ledger {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let ids = load_ids(&path)?;
        debug!(path = %path.display(), entries = ids.len(), "ledger opened");
        Ok(Self { path, ids })
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.ids.contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn record(&mut self, sample: &Sample) -> Result<RecordOutcome, LedgerError> {
        if sample.code.trim().is_empty() {
            warn!(task_id = %sample.task_id, "empty candidate; not saved");
            return Ok(RecordOutcome::Empty);
        }

        if self.ids.contains(&sample.task_id) {
            info!(
                task_id = %sample.task_id,
                path = %self.path.display(),
                "already recorded; skipping save"
            );
            return Ok(RecordOutcome::Duplicate);
        }

        append_line(&self.path, sample)?;
        self.ids.insert(sample.task_id.clone());
        info!(task_id = %sample.task_id, path = %self.path.display(), "saved sample");
        Ok(RecordOutcome::Written)
    }
}

/// Debug trace: one line per attempt, never deduplicated.
pub struct TraceLog {
    path: PathBuf,
}

impl TraceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&mut self, record: &AttemptRecord) -> Result<(), LedgerError> {
        if record.code.trim().is_empty() {
            return Ok(());
        }
        append_line(&self.path, record)
    }
}

pub fn fingerprint(code: &str) -> String {
    let mut h = Sha256::new();
    h.update(code.as_bytes());
    hex::encode(h.finalize())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn load_ids(path: &Path) -> Result<HashSet<String>, LedgerError> {
    let mut ids = HashSet::new();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(io_err(path)(e)),
    };

    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LedgerKey>(&line) {
            Ok(k) => {
                ids.insert(k.task_id);
            }
            Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "unreadable ledger line"),
        }
    }

    Ok(ids)
}

fn append_line<T: Serialize>(path: &Path, value: &T) -> Result<(), LedgerError> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(io_err(path))?;

    // A torn last line must not swallow the new record.
    if !ends_with_newline(&mut file).map_err(io_err(path))? {
        line.insert(0, '\n');
    }
    file.write_all(line.as_bytes()).map_err(io_err(path))?;
    file.sync_data().map_err(io_err(path))
}

/// True for an empty file. Appends land at the end whatever the cursor.
fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
