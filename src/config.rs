use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert evaluator of AI systems. \
Given a question with a specified instruction, you will rate how well an AI model's answer follows that instruction. \
Using the supplied correct answer as an example, award 1 point if the model followed the instruction and 0 points if it did not.\n\
Your response must use exactly this format:\n\
Reason: <one or two sentences explaining the rating>\n\
Score: <0 or 1>";

pub const DEFAULT_USER_PROMPT: &str = "Using the supplied correct answer as an example, \
evaluate the model's ability to follow the instructions in the question below:\n\n\
Question: {question}\n\n\
Model Answer: {generated_answer}\n\n\
Correct Answer: {expected_answer}";

/// Placeholders substituted into the judge prompt templates
pub const PROMPT_PLACEHOLDERS: [&str; 3] = ["{question}", "{expected_answer}", "{generated_answer}"];

/// Settings for the judge model used by the instruct metric
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JudgeConfig {
    /// OpenAI-compatible API endpoint
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    #[serde(default = "default_env_var_api_key")]
    pub env_var_api_key: String,
    /// Rating model name
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u16,
    /// Rate limit for judge requests per second (<= 0 disables)
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Total attempts per sample, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Highest score the judge can award; parsed scores are divided by it
    #[serde(default = "default_score_scale")]
    pub score_scale: f64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_user_prompt")]
    pub user_prompt: String,
}

fn default_api_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_env_var_api_key() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u16 {
    512
}

fn default_rate_limit() -> f64 {
    10.0
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_score_scale() -> f64 {
    1.0
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_user_prompt() -> String {
    DEFAULT_USER_PROMPT.to_string()
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            env_var_api_key: default_env_var_api_key(),
            model: default_model(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            rate_limit_rps: default_rate_limit(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            score_scale: default_score_scale(),
            system_prompt: default_system_prompt(),
            user_prompt: default_user_prompt(),
        }
    }
}

/// A named split of a dataset and its expected size
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatasetSplitConfig {
    pub name: String,
    pub num_samples: usize,
}

/// Declarative description of the benchmark the samples were rendered from.
/// Templates are recorded as-is; nothing here renders them.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatasetConfig {
    pub name: String,
    /// Source location (e.g. a dataset hub path)
    pub path: String,
    #[serde(default)]
    pub splits: Vec<DatasetSplitConfig>,
    #[serde(default)]
    pub assistant_template: Option<String>,
    #[serde(default)]
    pub transcript_template: Option<String>,
}

impl DatasetConfig {
    /// Big Bench Audio, restricted to clips shorter than 30 seconds
    pub fn big_bench_audio() -> Self {
        Self {
            name: "big-bench-audio".to_string(),
            path: "eustlb/big-bench-audio-less-than-30s".to_string(),
            splits: vec![DatasetSplitConfig {
                name: "validation".to_string(),
                num_samples: 792,
            }],
            assistant_template: Some("{{official_answer}}".to_string()),
            transcript_template: Some("{{original_question}}".to_string()),
        }
    }

    /// Look up a built-in dataset description by name
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "big-bench-audio" => Some(Self::big_bench_audio()),
            _ => None,
        }
    }

    /// Expected sample count summed over all splits
    pub fn total_samples(&self) -> usize {
        self.splits.iter().map(|s| s.num_samples).sum()
    }
}

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub judge: JudgeConfig,
    /// Optional path of a JSON-lines report file
    #[serde(default)]
    pub storage_path: Option<String>,
    /// Stop the run on the first malformed input line
    #[serde(default)]
    pub abort_on_input_error: bool,
    #[serde(default)]
    pub dataset: Option<DatasetConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the judge cannot work with
    pub fn validate(&self) -> Result<()> {
        let judge = &self.judge;
        if !judge.score_scale.is_finite() || judge.score_scale <= 0.0 {
            anyhow::bail!("judge.score_scale must be positive, got {}", judge.score_scale);
        }
        if !judge.rate_limit_rps.is_finite()
            || judge.rate_limit_rps < 0.0
            || (judge.rate_limit_rps > 0.0
                && Duration::try_from_secs_f64(1.0 / judge.rate_limit_rps).is_err())
        {
            anyhow::bail!(
                "judge.rate_limit_rps must be 0 (unlimited) or a positive rate, got {}",
                judge.rate_limit_rps
            );
        }
        if judge.max_attempts == 0 {
            anyhow::bail!("judge.max_attempts must be at least 1");
        }
        if judge.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "judge.backoff_multiplier must be at least 1.0, got {}",
                judge.backoff_multiplier
            );
        }

        let references_sample = |template: &str| {
            PROMPT_PLACEHOLDERS
                .iter()
                .any(|placeholder| template.contains(placeholder))
        };
        if !references_sample(&judge.system_prompt) && !references_sample(&judge.user_prompt) {
            anyhow::bail!(
                "judge prompts must reference at least one of {}",
                PROMPT_PLACEHOLDERS.join(", ")
            );
        }

        Ok(())
    }
}
