use crate::config::DatasetConfig;
use crate::error::EvalError;
use crate::evaluation::Metric;
use serde::{Deserialize, Serialize};

/// One evaluation unit read from a line of the input file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Question posed to the model
    pub question: String,
    /// Reference answer from the benchmark
    pub expected_answer: String,
    /// Answer produced by the model under evaluation
    pub generated_answer: String,
}

impl Sample {
    /// Parse a sample from a single JSON line. Unknown fields are ignored.
    pub fn from_json(line: &str) -> Result<Self, EvalError> {
        let sample: Sample =
            serde_json::from_str(line).map_err(|e| EvalError::Input(e.to_string()))?;

        for (field, value) in [
            ("question", &sample.question),
            ("expected_answer", &sample.expected_answer),
            ("generated_answer", &sample.generated_answer),
        ] {
            if value.trim().is_empty() {
                return Err(EvalError::Input(format!("field `{}` is empty", field)));
            }
        }

        Ok(sample)
    }
}

/// Outcome of the "asr" metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalResult {
    /// 1 - WER, clamped to [0, 1]
    pub score: f64,
    pub word_error_rate: f64,
}

/// Outcome of the "boolq" metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Always exactly 0.0 or 1.0
    pub score: f64,
    pub expected: bool,
    /// None when the generated answer contains no yes/no token
    pub predicted: Option<bool>,
}

/// Outcome of the "instruct" metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructResult {
    /// Judge score divided by the judge's scale
    pub score: f64,
    /// Rationale given by the judge
    pub reason: String,
}

/// A sample that could not be scored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedResult {
    pub error_kind: String,
    pub message: String,
}

impl From<&EvalError> for FailedResult {
    fn from(err: &EvalError) -> Self {
        Self {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of evaluating one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalResult {
    Lexical(LexicalResult),
    Classification(ClassificationResult),
    Instruct(InstructResult),
    Failed(FailedResult),
}

impl EvalResult {
    /// Score in [0, 1], or None for a failed evaluation
    pub fn score(&self) -> Option<f64> {
        match self {
            EvalResult::Lexical(r) => Some(r.score),
            EvalResult::Classification(r) => Some(r.score),
            EvalResult::Instruct(r) => Some(r.score),
            EvalResult::Failed(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            EvalResult::Instruct(r) => Some(&r.reason),
            _ => None,
        }
    }

    /// "kind: message" annotation for failed results
    pub fn error(&self) -> Option<String> {
        match self {
            EvalResult::Failed(f) => Some(format!("{}: {}", f.error_kind, f.message)),
            _ => None,
        }
    }
}

/// Per-sample record handed to reporters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Zero-based position in the input stream
    pub index: usize,
    pub question: String,
    pub expected_answer: String,
    pub generated_answer: String,
    pub score: Option<f64>,
    pub reason: Option<String>,
    pub error: Option<String>,
    /// Mean of all successful scores up to and including this sample
    pub running_average: Option<f64>,
}

impl SampleRecord {
    /// Build a record; `sample` is None when the input line was malformed
    pub fn new(
        index: usize,
        sample: Option<&Sample>,
        result: &EvalResult,
        running_average: Option<f64>,
    ) -> Self {
        let (question, expected_answer, generated_answer) = match sample {
            Some(s) => (
                s.question.clone(),
                s.expected_answer.clone(),
                s.generated_answer.clone(),
            ),
            None => Default::default(),
        };

        Self {
            index,
            question,
            expected_answer,
            generated_answer,
            score: result.score(),
            reason: result.reason().map(str::to_string),
            error: result.error(),
            running_average,
        }
    }
}

/// Aggregate outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub metric: Metric,
    /// Samples seen, including failures
    pub total: usize,
    pub scored: usize,
    pub failed: usize,
    /// None when no sample was scored
    pub average_score: Option<f64>,
    pub median_score: Option<f64>,
    /// True when the run stopped early on an interrupt
    #[serde(default)]
    pub interrupted: bool,
}

impl Summary {
    /// Error out when any sample could not be scored, so the process exits non-zero
    pub fn ensure_all_scored(&self) -> anyhow::Result<()> {
        if self.failed > 0 {
            anyhow::bail!("{} of {} samples could not be scored", self.failed, self.total);
        }
        Ok(())
    }
}

/// Run header handed to reporters before any sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    /// Label of the model whose answers are being scored
    pub model: String,
    pub metric: Metric,
    pub input: String,
    /// Judge model, only for the instruct metric
    pub rating_model: Option<String>,
    /// Judge prompt templates and scale the scores were produced with
    pub system_prompt: Option<String>,
    pub user_prompt: Option<String>,
    pub score_scale: Option<f64>,
    pub dataset: Option<DatasetConfig>,
}
