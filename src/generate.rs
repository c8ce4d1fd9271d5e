// src/generate.rs
//
// Baseline generation and self-refinement over a problem set. Both write
// through the ledger, so an interrupted run resumes where it stopped.

use std::time::Instant;

use rand::Rng;
use tracing::{info, warn};

use crate::dataset::TaskRecord;
use crate::error::GenerationError;
use crate::ledger::{Ledger, Sample};
use crate::llm::client::{preview, Oracle};
use crate::llm::prompt::{
    feedback_prompt, generation_prompt, improve_prompt, solve_text, NO_IMPROVEMENTS,
};
use crate::llm::transport::Sleeper;
use crate::repair::batch::{persist, BatchStats, TaskDelay};
use crate::repair::extract::code_or_raw;

/// Problem fields the generators need.
struct Problem {
    id: String,
    text: String,
}

impl Problem {
    fn from_record(r: &TaskRecord) -> Option<Self> {
        let id = r.task_id.as_deref().filter(|s| !s.trim().is_empty())?;
        let text = r.prompt.as_deref().filter(|s| !s.trim().is_empty())?;
        Some(Self {
            id: id.to_string(),
            text: text.to_string(),
        })
    }
}

struct Generated {
    reply: String,
    completion_tokens: u64,
}

pub struct GenerateRun<'a> {
    pub oracle: &'a dyn Oracle,
    pub ledger: &'a mut Ledger,
    pub sleeper: &'a dyn Sleeper,
    pub delay: TaskDelay,
}

impl GenerateRun<'_> {
    /// One generation per problem; the first fenced block is the sample.
    pub fn baseline(
        &mut self,
        records: impl IntoIterator<Item = TaskRecord>,
        rng: &mut impl Rng,
    ) -> Result<BatchStats, GenerationError> {
        let oracle = self.oracle;
        self.drive("baseline", records, rng, |p| {
            let g = oracle.generate(&generation_prompt(&solve_text(&p.text)), None)?;
            info!(
                task_id = %p.id,
                elapsed_ms = g.elapsed.as_millis() as u64,
                completion_tokens = g.completion_tokens,
                "generated"
            );
            Ok(Generated {
                reply: g.text,
                completion_tokens: g.completion_tokens,
            })
        })
    }

    /// Generate, then alternate feedback and improvement for up to `rounds`
    /// rounds. Stops early when the feedback is empty or says nothing needs
    /// improving.
    pub fn refine(
        &mut self,
        records: impl IntoIterator<Item = TaskRecord>,
        rounds: u32,
        feedback_max_tokens: u32,
        rng: &mut impl Rng,
    ) -> Result<BatchStats, GenerationError> {
        let oracle = self.oracle;
        self.drive("refine", records, rng, |p| {
            let solve = solve_text(&p.text);
            let first = oracle.generate(&generation_prompt(&solve), None)?;
            let mut tokens = first.completion_tokens;
            let mut current = first.text;

            if current.trim().is_empty() {
                return Ok(Generated {
                    reply: current,
                    completion_tokens: tokens,
                });
            }

            for round in 1..=rounds {
                let feedback = oracle.generate(&feedback_prompt(&current), Some(feedback_max_tokens))?;
                tokens += feedback.completion_tokens;

                if feedback.text.trim().is_empty() || feedback.text.contains(NO_IMPROVEMENTS) {
                    info!(task_id = %p.id, round, "no further improvements");
                    break;
                }

                let improved =
                    oracle.generate(&improve_prompt(&solve, &current, &feedback.text), None)?;
                tokens += improved.completion_tokens;

                if improved.text.trim().is_empty() {
                    warn!(task_id = %p.id, round, "empty refinement; keeping previous code");
                    break;
                }
                current = improved.text;
            }

            Ok(Generated {
                reply: current,
                completion_tokens: tokens,
            })
        })
    }

    fn drive<F>(
        &mut self,
        label: &str,
        records: impl IntoIterator<Item = TaskRecord>,
        rng: &mut impl Rng,
        mut produce: F,
    ) -> Result<BatchStats, GenerationError>
    where
        F: FnMut(&Problem) -> Result<Generated, GenerationError>,
    {
        let started = Instant::now();
        let mut stats = BatchStats::default();
        let mut first = true;

        for record in records {
            let Some(problem) = Problem::from_record(&record) else {
                warn!(task_id = ?record.task_id, "skipping invalid problem");
                stats.skipped_invalid += 1;
                continue;
            };

            if self.ledger.contains(&problem.id) {
                info!(task_id = %problem.id, "already generated; skipping");
                stats.skipped_recorded += 1;
                continue;
            }

            if !first {
                self.delay.pause(self.sleeper, &mut *rng);
            }
            first = false;

            info!(task_id = %problem.id, preview = %preview(&problem.text, 100), "generating");
            let generated = produce(&problem)?;
            stats.processed += 1;
            stats.completion_tokens += generated.completion_tokens;

            // The problem text is kept in the "input" column, as downstream
            // evaluators expect.
            let sample = Sample {
                task_id: problem.id.clone(),
                tests: problem.text.clone(),
                prompt: solve_text(&problem.text),
                code: code_or_raw(&generated.reply),
            };
            persist(self.ledger, &sample, &mut stats);
        }

        stats.log_summary(label, started.elapsed());
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::tests::RecordingSleeper;
    use crate::repair::session::tests::ScriptedOracle;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;

    fn record(json: &str) -> TaskRecord {
        serde_json::from_str(json).unwrap()
    }

    fn rows(path: &std::path::Path) -> Vec<serde_json::Value> {
        fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn baseline_extracts_code_and_pauses_between_problems() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("baseline.jsonl");
        let mut ledger = Ledger::open(&out).unwrap();
        let oracle = ScriptedOracle::new(vec![
            "Sure:\n```python\ndef a():\n    return 1\n```",
            "def b(): return 2",
        ]);
        let sleeper = RecordingSleeper::default();
        let mut rng = StdRng::seed_from_u64(3);

        let stats = GenerateRun {
            oracle: &oracle,
            ledger: &mut ledger,
            sleeper: &sleeper,
            delay: TaskDelay::from_range([1, 5]),
        }
        .baseline(
            vec![
                record(r#"{"task_id":"H/0","prompt":"def a():\n"}"#),
                record(r#"{"task_id":"H/1","prompt":"def b():\n"}"#),
            ],
            &mut rng,
        )
        .unwrap();

        let saved = rows(&out);
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0]["output"], "def a():\n    return 1");
        assert_eq!(saved[0]["input"], "def a():\n");
        assert_eq!(saved[0]["prompt"], "Solve the following problem:\ndef a():\n");
        assert_eq!(saved[1]["output"], "def b(): return 2");
        assert_eq!(stats.processed, 2);
        assert_eq!(sleeper.slept.borrow().len(), 1);
    }

    #[test]
    fn baseline_skips_problems_already_in_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("baseline.jsonl");
        fs::write(&out, "{\"task_id\":\"H/0\",\"output\":\"x\"}\n").unwrap();
        let mut ledger = Ledger::open(&out).unwrap();
        let oracle = ScriptedOracle::new(vec![]);
        let sleeper = RecordingSleeper::default();
        let mut rng = StdRng::seed_from_u64(3);

        let stats = GenerateRun {
            oracle: &oracle,
            ledger: &mut ledger,
            sleeper: &sleeper,
            delay: TaskDelay::from_range([0, 0]),
        }
        .baseline(vec![record(r#"{"task_id":"H/0","prompt":"p"}"#)], &mut rng)
        .unwrap();

        assert_eq!(stats.skipped_recorded, 1);
        assert_eq!(oracle.calls(), 0);
    }

    #[test]
    fn refine_stops_on_no_improvement_marker() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("refine.jsonl");
        let mut ledger = Ledger::open(&out).unwrap();
        let oracle = ScriptedOracle::new(vec![
            "```python\nv1 = 1\n```",
            "Use a better name.",
            "```python\nvalue = 1\n```",
            "No improvements needed.",
        ]);
        let sleeper = RecordingSleeper::default();
        let mut rng = StdRng::seed_from_u64(3);

        GenerateRun {
            oracle: &oracle,
            ledger: &mut ledger,
            sleeper: &sleeper,
            delay: TaskDelay::from_range([0, 0]),
        }
        .refine(vec![record(r#"{"task_id":"H/0","prompt":"p"}"#)], 3, 200, &mut rng)
        .unwrap();

        assert_eq!(oracle.calls(), 4);
        assert!(oracle.prompts.borrow()[2].user.contains("Use a better name."));
        assert_eq!(rows(&out)[0]["output"], "value = 1");
    }

    #[test]
    fn refine_is_bounded_by_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("refine.jsonl");
        let mut ledger = Ledger::open(&out).unwrap();
        let oracle = ScriptedOracle::new(vec!["a = 0", "fb", "a = 1", "fb", "a = 2", "fb", "a = 3"]);
        let sleeper = RecordingSleeper::default();
        let mut rng = StdRng::seed_from_u64(3);

        GenerateRun {
            oracle: &oracle,
            ledger: &mut ledger,
            sleeper: &sleeper,
            delay: TaskDelay::from_range([0, 0]),
        }
        .refine(vec![record(r#"{"task_id":"H/0","prompt":"p"}"#)], 2, 200, &mut rng)
        .unwrap();

        assert_eq!(oracle.calls(), 5);
        assert_eq!(rows(&out)[0]["output"], "a = 2");
    }
}
