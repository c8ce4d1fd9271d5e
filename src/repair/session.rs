// Per-task repair state machine.
//
//   NeedsInitialCandidate -> Testing -> Passed
//                               |
//                               v
//                          NeedsRepair -> Repairing -> Testing ...
//                               |
//                               v
//                           Exhausted
//
// Every tested candidate goes to the trace before its test runs.

use tracing::{debug, info, warn};

use crate::config::RepairPromptStyle;
use crate::error::GenerationError;
use crate::ledger::{AttemptRecord, Sample, TraceLog};
use crate::llm::client::{preview, Oracle};
use crate::llm::prompt::{generation_prompt, repair_prompt, solve_text};
use crate::dataset::Task;
use crate::repair::extract::code_or_raw;
use crate::repair::harness::{Harness, TestOutcome};
use crate::repair::sanitize::fix_unterminated_literals;

#[derive(Debug, Clone, Copy)]
pub struct RepairSettings {
    /// Repair requests allowed per task.
    pub max_attempts: u32,
    pub style: RepairPromptStyle,
    /// Accept an upstream "passed" marker without running the tests.
    pub trust_upstream_pass: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Upstream pass marker accepted; nothing was run or generated.
    Trusted,
    Passed { repairs: u32 },
    Exhausted { repairs: u32, diagnostic: String },
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    /// Candidate to persist: the passing one, or the last one tested.
    pub sample: Sample,
    pub completion_tokens: u64,
}

enum State {
    NeedsInitialCandidate,
    Testing { code: String },
    NeedsRepair { code: String, diagnostic: String },
    Passed { code: String },
    Exhausted { code: String, diagnostic: String },
}

pub struct Repairer<'a> {
    oracle: &'a dyn Oracle,
    harness: &'a dyn Harness,
    trace: &'a mut TraceLog,
    run_id: String,
    settings: RepairSettings,
}

impl<'a> Repairer<'a> {
    pub fn new(
        oracle: &'a dyn Oracle,
        harness: &'a dyn Harness,
        trace: &'a mut TraceLog,
        run_id: impl Into<String>,
        settings: RepairSettings,
    ) -> Self {
        Self {
            oracle,
            harness,
            trace,
            run_id: run_id.into(),
            settings,
        }
    }

    /// Runs one task to `Passed`, `Exhausted` or `Trusted`.
    ///
    /// Generation failures are returned as-is; test failures never are.
    pub fn repair(&mut self, task: &Task) -> Result<SessionReport, GenerationError> {
        if self.settings.trust_upstream_pass && task.upstream_passed {
            if let Some(code) = &task.candidate {
                info!(task_id = %task.id, "already passed upstream; keeping candidate");
                return Ok(SessionReport {
                    outcome: SessionOutcome::Trusted,
                    sample: sample_for(task, code.clone()),
                    completion_tokens: 0,
                });
            }
        }

        let mut tokens = 0u64;
        let mut tested = 0u32;
        let mut repairs = 0u32;

        let mut state = match &task.candidate {
            Some(code) => State::Testing {
                code: fix_unterminated_literals(code),
            },
            None => State::NeedsInitialCandidate,
        };

        loop {
            state = match state {
                State::NeedsInitialCandidate => {
                    info!(task_id = %task.id, "no candidate; generating one");
                    let g = self
                        .oracle
                        .generate(&generation_prompt(&solve_text(&task.prompt)), None)?;
                    tokens += g.completion_tokens;
                    State::Testing {
                        code: fix_unterminated_literals(&code_or_raw(&g.text)),
                    }
                }

                State::Testing { code } => {
                    tested += 1;
                    info!(task_id = %task.id, attempt = tested, "testing candidate");
                    self.trace_attempt(task, tested, &code);

                    let outcome = self.harness.run(&code, &task.tests);
                    info!(
                        task_id = %task.id,
                        attempt = tested,
                        result = %preview(outcome.summary(), 200),
                        "test finished"
                    );

                    match outcome {
                        TestOutcome::Passed => State::Passed { code },
                        TestOutcome::Failed { diagnostic } => {
                            if repairs < self.settings.max_attempts {
                                State::NeedsRepair { code, diagnostic }
                            } else {
                                State::Exhausted { code, diagnostic }
                            }
                        }
                    }
                }

                State::NeedsRepair { code, diagnostic } => {
                    repairs += 1;
                    debug!(task_id = %task.id, repair = repairs, "requesting repair");
                    let prompt =
                        repair_prompt(self.settings.style, &task.prompt, &code, &diagnostic);
                    let g = self.oracle.generate(&prompt, None)?;
                    tokens += g.completion_tokens;

                    let fixed = fix_unterminated_literals(&code_or_raw(&g.text));
                    if fixed == code {
                        debug!(task_id = %task.id, "repair returned an unchanged candidate");
                    }
                    State::Testing { code: fixed }
                }

                State::Passed { code } => {
                    info!(task_id = %task.id, attempts = tested, repairs, "passed");
                    return Ok(SessionReport {
                        outcome: SessionOutcome::Passed { repairs },
                        sample: sample_for(task, code),
                        completion_tokens: tokens,
                    });
                }

                State::Exhausted { code, diagnostic } => {
                    warn!(
                        task_id = %task.id,
                        repairs,
                        "could not be corrected; keeping last candidate"
                    );
                    return Ok(SessionReport {
                        outcome: SessionOutcome::Exhausted { repairs, diagnostic },
                        sample: sample_for(task, code),
                        completion_tokens: tokens,
                    });
                }
            };
        }
    }

    fn trace_attempt(&mut self, task: &Task, attempt: u32, code: &str) {
        let record = AttemptRecord::new(&self.run_id, attempt, &sample_for(task, code.to_string()));
        if let Err(e) = self.trace.append(&record) {
            warn!(task_id = %task.id, attempt, error = %e, "debug trace write failed");
        }
    }
}

fn sample_for(task: &Task, code: String) -> Sample {
    Sample {
        task_id: task.id.clone(),
        tests: task.tests.clone(),
        prompt: task.prompt.clone(),
        code,
    }
}
