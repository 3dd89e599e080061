use crate::error::EvalError;
use crate::judge::Judge;
use crate::models::{EvalResult, FailedResult, Sample};
use crate::{boolq, lexical};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Scoring strategy applied to every sample of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Word error rate against the reference transcript
    Asr,
    /// Yes/no answer matching
    Boolq,
    /// Judge model rating
    Instruct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Asr => "asr",
            Metric::Boolq => "boolq",
            Metric::Instruct => "instruct",
        }
    }
}

impl FromStr for Metric {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asr" => Ok(Metric::Asr),
            "boolq" => Ok(Metric::Boolq),
            "instruct" => Ok(Metric::Instruct),
            _ => Err(EvalError::UnsupportedMetric(s.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatches samples to the scorer for a metric
pub struct Evaluator {
    /// Only needed for the instruct metric
    judge: Option<Judge>,
}

impl Evaluator {
    /// Evaluator for the lexical and classification metrics
    pub fn new() -> Self {
        Self { judge: None }
    }

    pub fn with_judge(judge: Judge) -> Self {
        Self { judge: Some(judge) }
    }

    pub fn judge(&self) -> Option<&Judge> {
        self.judge.as_ref()
    }

    /// Score a sample, returning scorer errors to the caller
    pub async fn try_evaluate(&self, sample: &Sample, metric: Metric) -> Result<EvalResult, EvalError> {
        match metric {
            Metric::Asr => Ok(EvalResult::Lexical(lexical::score(sample))),
            Metric::Boolq => boolq::score(sample).map(EvalResult::Classification),
            Metric::Instruct => match &self.judge {
                Some(judge) => judge.rate(sample).await.map(EvalResult::Instruct),
                None => Err(EvalError::JudgeUnavailable {
                    attempts: 0,
                    message: "no rating client configured".to_string(),
                }),
            },
        }
    }

    /// Score a sample; failures become a failed result instead of an error
    pub async fn evaluate(&self, sample: &Sample, metric: Metric) -> EvalResult {
        match self.try_evaluate(sample, metric).await {
            Ok(result) => result,
            Err(err) => {
                warn!(metric = %metric, error = %err, "sample evaluation failed");
                EvalResult::Failed(FailedResult::from(&err))
            }
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}
