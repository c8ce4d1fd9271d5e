// Runs a candidate together with its test script in a separate interpreter.
//
// The child runs with the same privileges as this process. Isolation is
// limited to: a fresh scratch directory as cwd, interpreter isolated mode
// (-I), closed stdin and a wall-clock timeout.

use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::HarnessConfig;

pub const PASS_MARKER: &str = "All tests passed";

const DIAGNOSTIC_LIMIT: usize = 2_000;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed { diagnostic: String },
}

impl TestOutcome {
    /// Pass marker or the diagnostic text.
    pub fn summary(&self) -> &str {
        match self {
            TestOutcome::Passed => PASS_MARKER,
            TestOutcome::Failed { diagnostic } => diagnostic,
        }
    }
}

pub trait Harness {
    /// Executes `candidate`, a newline, then `tests`. One attempt, no retries.
    fn run(&self, candidate: &str, tests: &str) -> TestOutcome;
}

#[derive(Debug, Clone)]
pub struct PythonHarness {
    python: String,
    timeout: Duration,
}

impl PythonHarness {
    pub fn new(cfg: &HarnessConfig) -> Self {
        Self {
            python: cfg.python.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    fn execute(&self, program: &str) -> std::io::Result<TestOutcome> {
        let scratch = tempfile::tempdir()?;
        let dir = scratch.path();

        fs::write(dir.join("program.py"), program)?;
        let stdout = File::create(dir.join("stdout.txt"))?;
        let stderr = File::create(dir.join("stderr.txt"))?;

        let started = Instant::now();
        let mut child = Command::new(&self.python)
            .arg("-I")
            .arg("program.py")
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()?;

        let status = match wait_with_timeout(&mut child, self.timeout)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(TestOutcome::Failed {
                    diagnostic: format!(
                        "TimeoutError: execution exceeded {}s",
                        self.timeout.as_secs()
                    ),
                });
            }
        };

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            code = status.code().unwrap_or(-1),
            "harness run finished"
        );

        if status.success() {
            return Ok(TestOutcome::Passed);
        }

        let err = read_lossy(&dir.join("stderr.txt"));
        let out = read_lossy(&dir.join("stdout.txt"));

        Ok(TestOutcome::Failed {
            diagnostic: diagnostic_from(&err, &out, status.code()),
        })
    }
}

impl Harness for PythonHarness {
    fn run(&self, candidate: &str, tests: &str) -> TestOutcome {
        let program = format!("{candidate}\n{tests}");
        match self.execute(&program) {
            Ok(outcome) => outcome,
            Err(e) => TestOutcome::Failed {
                diagnostic: format!("harness error: {e}"),
            },
        }
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn read_lossy(path: &Path) -> String {
    fs::read(path)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

/// The exception text of a traceback: everything from the first unindented
/// line after the last `  File` frame to the end of stderr, so multi-line
/// messages keep their exception type. Without a frame, the last unindented
/// line. Falls back to stdout, then to the exit code.
fn diagnostic_from(stderr: &str, stdout: &str, code: Option<i32>) -> String {
    let text = match exception_text(stderr) {
        Some(t) => t,
        None if !stdout.trim().is_empty() => stdout.trim().to_string(),
        None => format!("process exited with status {}", code.unwrap_or(-1)),
    };

    truncate_tail(&text, DIAGNOSTIC_LIMIT)
}

fn exception_text(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr.lines().collect();
    let unindented = |l: &&str| !l.trim().is_empty() && !l.starts_with(char::is_whitespace);

    let start = match lines.iter().rposition(|l| l.starts_with("  File ")) {
        Some(frame) => frame + 1 + lines[frame + 1..].iter().position(unindented)?,
        None => lines.iter().rposition(unindented)?,
    };

    Some(lines[start..].join("\n").trim().to_string())
}

fn truncate_tail(s: &str, limit: usize) -> String {
    let count = s.chars().count();
    if count <= limit {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count - limit).collect();
    format!("...truncated...\n{tail}")
}
