// Sequential driver: one task at a time, in input order.

use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{error, info, warn};

use crate::dataset::{Task, TaskRecord};
use crate::error::GenerationError;
use crate::ledger::{Ledger, RecordOutcome, Sample};
use crate::llm::client::preview;
use crate::llm::transport::Sleeper;
use crate::repair::session::{Repairer, SessionOutcome};

/// Randomized pause between tasks, uniform over `[min, max]` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDelay {
    min_secs: u64,
    max_secs: u64,
}

impl TaskDelay {
    pub fn from_range(range: [u64; 2]) -> Self {
        Self {
            min_secs: range[0].min(range[1]),
            max_secs: range[0].max(range[1]),
        }
    }

    pub fn pick(&self, rng: &mut impl Rng) -> Duration {
        if self.max_secs == 0 {
            return Duration::ZERO;
        }
        let lo = self.min_secs.saturating_mul(1000);
        let hi = self.max_secs.saturating_mul(1000);
        let ms = rng.gen_range(lo..=hi);
        Duration::from_millis(ms)
    }

    pub fn pause(&self, sleeper: &dyn Sleeper, rng: &mut impl Rng) {
        let d = self.pick(rng);
        if !d.is_zero() {
            sleeper.sleep(d);
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub passed: usize,
    pub trusted: usize,
    pub exhausted: usize,
    pub skipped_invalid: usize,
    pub skipped_recorded: usize,
    pub skipped_empty: usize,
    pub write_failures: usize,
    pub repair_requests: u64,
    pub completion_tokens: u64,
}

impl BatchStats {
    pub fn average_tokens(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.completion_tokens as f64 / self.processed as f64
    }

    pub fn log_summary(&self, label: &str, elapsed: Duration) {
        info!(
            batch = label,
            wall_clock_secs = elapsed.as_secs_f64(),
            processed = self.processed,
            passed = self.passed,
            trusted = self.trusted,
            exhausted = self.exhausted,
            skipped_invalid = self.skipped_invalid,
            skipped_recorded = self.skipped_recorded,
            skipped_empty = self.skipped_empty,
            write_failures = self.write_failures,
            repair_requests = self.repair_requests,
            avg_completion_tokens = self.average_tokens(),
            "batch finished"
        );
    }
}

/// Writes a sample and folds the result into `stats`. Ledger faults are
/// logged; they never stop the batch.
pub fn persist(ledger: &mut Ledger, sample: &Sample, stats: &mut BatchStats) {
    match ledger.record(sample) {
        Ok(RecordOutcome::Written) | Ok(RecordOutcome::Duplicate) => {}
        Ok(RecordOutcome::Empty) => {
            warn!(task_id = %sample.task_id, "skipping task: empty candidate");
            stats.skipped_empty += 1;
        }
        Err(e) => {
            error!(task_id = %sample.task_id, error = %e, "failed to save sample");
            stats.write_failures += 1;
        }
    }
}

/// Repairs every task in `records`. Returns early only on a generation
/// failure, which halts the whole batch.
pub fn run_repair_batch(
    records: impl IntoIterator<Item = TaskRecord>,
    repairer: &mut Repairer<'_>,
    ledger: &mut Ledger,
    sleeper: &dyn Sleeper,
    delay: TaskDelay,
    rng: &mut impl Rng,
) -> Result<BatchStats, GenerationError> {
    let started = Instant::now();
    let mut stats = BatchStats::default();
    let mut first = true;

    for record in records {
        let Some(task) = Task::from_record(&record) else {
            warn!(task_id = ?record.task_id, "skipping invalid entry");
            stats.skipped_invalid += 1;
            continue;
        };

        if ledger.contains(&task.id) {
            info!(task_id = %task.id, "already in output ledger; skipping");
            stats.skipped_recorded += 1;
            continue;
        }

        if !first {
            delay.pause(sleeper, &mut *rng);
        }
        first = false;

        let report = repairer.repair(&task)?;
        stats.processed += 1;
        stats.completion_tokens += report.completion_tokens;
        match &report.outcome {
            SessionOutcome::Trusted => stats.trusted += 1,
            SessionOutcome::Passed { repairs } => {
                stats.passed += 1;
                stats.repair_requests += u64::from(*repairs);
            }
            SessionOutcome::Exhausted { repairs, diagnostic } => {
                stats.exhausted += 1;
                stats.repair_requests += u64::from(*repairs);
                warn!(
                    task_id = %task.id,
                    last_diagnostic = %preview(diagnostic, 200),
                    "unresolved after repairs"
                );
            }
        }

        persist(ledger, &report.sample, &mut stats);
    }

    stats.log_summary("repair", started.elapsed());
    Ok(stats)
}
