mod config;
mod dataset;
mod error;
mod generate;
mod ledger;
mod llm;
mod logger;
mod repair;
mod report;

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::config::{Config, RepairPromptStyle};
use crate::dataset::stream_records;
use crate::generate::GenerateRun;
use crate::ledger::{Ledger, TraceLog};
use crate::llm::client::GenerationClient;
use crate::llm::transport::ThreadSleeper;
use crate::repair::batch::{run_repair_batch, TaskDelay};
use crate::repair::harness::PythonHarness;
use crate::repair::session::{RepairSettings, Repairer};

#[derive(Parser)]
#[command(
    name = "coderepair",
    version,
    about = "Generate code samples with an LLM and repair failing ones against their tests."
)]
struct Cli {
    #[arg(long, global = true, help = "Config file (default: <config dir>/coderepair/config.toml)")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false, help = "Debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate one baseline sample per problem
    Generate(GenerateArgs),
    /// Generate, then refine each sample through model feedback
    Refine(RefineArgs),
    /// Test baseline samples and repair the failing ones
    Repair(RepairArgs),
    /// Print a results file
    Report(ReportArgs),
}

impl Command {
    fn needs_config(&self) -> bool {
        !matches!(self, Command::Report(_))
    }
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, help = "Problems JSONL")]
    problems: Option<PathBuf>,

    #[arg(long, help = "Output JSONL")]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct RefineArgs {
    #[arg(long, help = "Problems JSONL")]
    problems: Option<PathBuf>,

    #[arg(long, help = "Output JSONL")]
    output: Option<PathBuf>,

    #[arg(long, help = "Maximum feedback rounds per problem")]
    rounds: Option<u32>,
}

#[derive(Args)]
struct RepairArgs {
    #[arg(long, help = "Baseline results JSONL")]
    baseline: Option<PathBuf>,

    #[arg(long, help = "Output ledger JSONL")]
    output: Option<PathBuf>,

    #[arg(long, help = "Per-attempt debug trace JSONL")]
    debug: Option<PathBuf>,

    #[arg(long, help = "Repair requests per task")]
    max_attempts: Option<u32>,

    #[arg(long, value_enum, help = "Repair prompt style")]
    prompt_style: Option<RepairPromptStyle>,

    #[arg(
        long,
        default_value_t = false,
        help = "Re-run tests for tasks already marked passed upstream"
    )]
    reverify: bool,
}

#[derive(Args)]
struct ReportArgs {
    /// Results JSONL
    file: PathBuf,

    #[arg(long, default_value_t = false, help = "Print full outputs")]
    full: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    // `report` reads only its file; a broken config must not block it.
    let mut cfg = if cli.command.needs_config() {
        Config::load(cli.config.as_deref())?
    } else {
        Config::default()
    };

    match cli.command {
        Command::Generate(args) => {
            if let Some(p) = args.problems {
                cfg.generation.problems_path = p;
            }
            if let Some(p) = args.output {
                cfg.generation.output_path = p;
            }
            run_generate(&cfg, false)?;
        }
        Command::Refine(args) => {
            if let Some(p) = args.problems {
                cfg.generation.problems_path = p;
            }
            if let Some(p) = args.output {
                cfg.generation.refine_output_path = p;
            }
            if let Some(n) = args.rounds {
                cfg.generation.refine_rounds = n;
            }
            run_generate(&cfg, true)?;
        }
        Command::Repair(args) => {
            if let Some(p) = args.baseline {
                cfg.pipeline.baseline_source = p;
            }
            if let Some(p) = args.output {
                cfg.pipeline.output_path = p;
            }
            if let Some(p) = args.debug {
                cfg.pipeline.debug_path = p;
            }
            if let Some(n) = args.max_attempts {
                cfg.pipeline.max_attempts = n;
            }
            if let Some(s) = args.prompt_style {
                cfg.pipeline.repair_prompt = s;
            }
            if args.reverify {
                cfg.pipeline.trust_upstream_pass = false;
            }
            run_repair(&cfg)?;
        }
        Command::Report(args) => {
            report::print_report(&args.file, args.full)?;
        }
    }

    Ok(())
}

fn run_generate(cfg: &Config, refine: bool) -> error::Result<()> {
    let g = &cfg.generation;
    let output = if refine {
        &g.refine_output_path
    } else {
        &g.output_path
    };

    let client = GenerationClient::new(cfg.api.clone())?;
    let mut ledger = Ledger::open(output)?;
    let records = stream_records(&g.problems_path)?;
    let mut rng = rand::thread_rng();

    info!(
        problems = %g.problems_path.display(),
        output = %output.display(),
        refine,
        "starting generation"
    );

    let mut run = GenerateRun {
        oracle: &client,
        ledger: &mut ledger,
        sleeper: &ThreadSleeper,
        delay: TaskDelay::from_range(g.task_delay_secs),
    };

    if refine {
        run.refine(records, g.refine_rounds, g.feedback_max_tokens, &mut rng)?;
    } else {
        run.baseline(records, &mut rng)?;
    }
    Ok(())
}

fn run_repair(cfg: &Config) -> error::Result<()> {
    let p = &cfg.pipeline;

    let client = GenerationClient::new(cfg.api.clone())?;
    let harness = PythonHarness::new(&cfg.harness);
    let mut ledger = Ledger::open(&p.output_path)?;
    let mut trace = TraceLog::new(&p.debug_path);
    let records = stream_records(&p.baseline_source)?;
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut rng = rand::thread_rng();

    info!(
        run_id = %run_id,
        baseline = %p.baseline_source.display(),
        output = %p.output_path.display(),
        already_recorded = ledger.len(),
        max_attempts = p.max_attempts,
        "starting repair"
    );

    let mut repairer = Repairer::new(
        &client,
        &harness,
        &mut trace,
        run_id,
        RepairSettings {
            max_attempts: p.max_attempts,
            style: p.repair_prompt,
            trust_upstream_pass: p.trust_upstream_pass,
        },
    );

    run_repair_batch(
        records,
        &mut repairer,
        &mut ledger,
        &ThreadSleeper,
        TaskDelay::from_range(p.task_delay_secs),
        &mut rng,
    )?;
    Ok(())
}
