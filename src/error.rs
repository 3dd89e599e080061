use thiserror::Error;

/// Errors raised while scoring a sample
#[derive(Debug, Error)]
pub enum EvalError {
    /// The input line could not be turned into a Sample
    #[error("malformed sample record: {0}")]
    Input(String),
    #[error("unsupported metric {0:?} (expected one of: asr, boolq, instruct)")]
    UnsupportedMetric(String),
    /// The benchmark's expected answer is not a yes/no value
    #[error("expected answer {0:?} is not a recognizable boolean")]
    Classification(String),
    #[error("judge model unavailable after {attempts} attempt(s): {message}")]
    JudgeUnavailable { attempts: u32, message: String },
    #[error("judge response could not be parsed after {attempts} attempt(s): {message}")]
    JudgeFormat { attempts: u32, message: String },
}

impl EvalError {
    /// Stable label attached to failed results
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Input(_) => "input_error",
            EvalError::UnsupportedMetric(_) => "unsupported_metric",
            EvalError::Classification(_) => "classification_error",
            EvalError::JudgeUnavailable { .. } => "judge_unavailable",
            EvalError::JudgeFormat { .. } => "judge_format_error",
        }
    }
}
