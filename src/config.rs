// src/config.rs
//
// Settings for the generative service, the repair pipeline and the harness.
// Sources, lowest to highest priority: built-in defaults, config.toml,
// CODEREPAIR_API_KEY, command-line flags (applied in main.rs).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const API_KEY_ENV: &str = "CODEREPAIR_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub pipeline: PipelineConfig,
    pub generation: GenerationConfig,
    pub harness: HarnessConfig,
}

/// Everything the generation client needs; handed over at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub top_k: u32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub default_retry_delay_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.sambanova.ai/v1/chat/completions".into(),
            model: "Meta-Llama-3.1-8B-Instruct".into(),
            api_key: None,
            temperature: 0.1,
            top_k: 50,
            max_tokens: 400,
            max_retries: 5,
            default_retry_delay_secs: 5,
            request_timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_secs(self.default_retry_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RepairPromptStyle {
    /// Show the code, then the error, and ask for a fix.
    Debug,
    /// Show the error, ask for a step-by-step explanation, then the full fix.
    Explain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub baseline_source: PathBuf,
    pub output_path: PathBuf,
    pub debug_path: PathBuf,
    pub max_attempts: u32,
    pub trust_upstream_pass: bool,
    pub repair_prompt: RepairPromptStyle,
    pub task_delay_secs: [u64; 2],
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            baseline_source: "baseline.jsonl_results.jsonl".into(),
            output_path: "self_debugging.jsonl".into(),
            debug_path: "debug_self_debugging.jsonl".into(),
            max_attempts: 3,
            trust_upstream_pass: true,
            repair_prompt: RepairPromptStyle::Debug,
            task_delay_secs: [0, 0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub problems_path: PathBuf,
    pub output_path: PathBuf,
    pub refine_output_path: PathBuf,
    pub task_delay_secs: [u64; 2],
    pub refine_rounds: u32,
    pub feedback_max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            problems_path: "HumanEval_subset.jsonl".into(),
            output_path: "baseline.jsonl".into(),
            refine_output_path: "self_refine.jsonl".into(),
            task_delay_secs: [1, 5],
            refine_rounds: 3,
            feedback_max_tokens: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub python: String,
    pub timeout_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            timeout_secs: 10,
        }
    }
}

impl Config {
    /// Loads `path`, or the per-user config file when no path is given.
    ///
    /// A missing per-user file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let p = config_path();
                if p.exists() {
                    Self::from_file(&p)?
                } else {
                    Self::default()
                }
            }
        };

        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                cfg.api.api_key = Some(key.trim().to_string());
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.max_retries == 0 {
            return Err(ConfigError::Invalid {
                field: "api.max_retries",
                reason: "must be at least 1".into(),
            });
        }
        check_delay_range("pipeline.task_delay_secs", self.pipeline.task_delay_secs)?;
        check_delay_range("generation.task_delay_secs", self.generation.task_delay_secs)?;
        if self.harness.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "harness.timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn check_delay_range(field: &'static str, range: [u64; 2]) -> Result<(), ConfigError> {
    if range[0] > range[1] {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("min {} is greater than max {}", range[0], range[1]),
        });
    }
    Ok(())
}

pub fn config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("coderepair");
    dir.push("config.toml");
    dir
}
