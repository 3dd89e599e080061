use crate::error::EvalError;
use crate::models::{ClassificationResult, Sample};
use crate::normalize::normalize;

const AFFIRMATIVE: &[&str] = &["yes", "true"];
const NEGATIVE: &[&str] = &["no", "false"];

/// First yes/no token in `text`, if any
pub fn parse_boolean(text: &str) -> Option<bool> {
    normalize(text).iter().find_map(|token| {
        if AFFIRMATIVE.contains(&token.as_str()) {
            Some(true)
        } else if NEGATIVE.contains(&token.as_str()) {
            Some(false)
        } else {
            None
        }
    })
}

/// Score a yes/no answer. An answer with no recognizable boolean scores 0.
pub fn score(sample: &Sample) -> Result<ClassificationResult, EvalError> {
    let expected = parse_boolean(&sample.expected_answer)
        .ok_or_else(|| EvalError::Classification(sample.expected_answer.clone()))?;
    let predicted = parse_boolean(&sample.generated_answer);

    let score = if predicted == Some(expected) { 1.0 } else { 0.0 };

    Ok(ClassificationResult {
        score,
        expected,
        predicted,
    })
}
