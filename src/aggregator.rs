use crate::evaluation::Metric;
use crate::models::{EvalResult, Summary};

/// Running statistics over the results of a run, in input order
pub struct Aggregator {
    metric: Metric,
    scores: Vec<f64>,
    sum: f64,
    failed: usize,
}

impl Aggregator {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            scores: Vec::new(),
            sum: 0.0,
            failed: 0,
        }
    }

    /// Fold one result in and return the running mean.
    /// Failed results are counted but do not move the mean.
    pub fn observe(&mut self, result: &EvalResult) -> Option<f64> {
        match result.score() {
            Some(score) => {
                self.scores.push(score);
                self.sum += score;
            }
            None => self.failed += 1,
        }
        self.average()
    }

    /// Mean of the successful scores so far
    pub fn average(&self) -> Option<f64> {
        if self.scores.is_empty() {
            None
        } else {
            Some(self.sum / self.scores.len() as f64)
        }
    }

    pub fn total(&self) -> usize {
        self.scores.len() + self.failed
    }

    /// Final statistics
    pub fn summary(&self, interrupted: bool) -> Summary {
        Summary {
            metric: self.metric,
            total: self.total(),
            scored: self.scores.len(),
            failed: self.failed,
            average_score: self.average(),
            median_score: calculate_median(&self.scores),
            interrupted,
        }
    }
}

/// Median of scores, None when empty
fn calculate_median(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }

    let mut sorted_scores = scores.to_vec();
    sorted_scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted_scores.len() / 2;
    if sorted_scores.len() % 2 == 0 {
        Some((sorted_scores[mid - 1] + sorted_scores[mid]) / 2.0)
    } else {
        Some(sorted_scores[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalError;
    use crate::models::{ClassificationResult, FailedResult, LexicalResult};

    fn classification(score: f64) -> EvalResult {
        EvalResult::Classification(ClassificationResult {
            score,
            expected: true,
            predicted: Some(score == 1.0),
        })
    }

    fn failed() -> EvalResult {
        EvalResult::Failed(FailedResult::from(&EvalError::JudgeUnavailable {
            attempts: 3,
            message: "connection refused".into(),
        }))
    }

    #[test]
    fn test_failures_excluded_from_average() {
        let mut aggregator = Aggregator::new(Metric::Boolq);
        aggregator.observe(&classification(1.0));
        aggregator.observe(&classification(0.0));
        aggregator.observe(&failed());

        let summary = aggregator.summary(false);
        assert_eq!(summary.average_score, Some(0.5));
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.scored, 2);
        assert_eq!(summary.total, 3);
        assert!(!summary.interrupted);
    }

    #[test]
    fn test_running_average() {
        let mut aggregator = Aggregator::new(Metric::Boolq);
        assert_eq!(aggregator.observe(&failed()), None);
        assert_eq!(aggregator.observe(&classification(1.0)), Some(1.0));
        assert_eq!(aggregator.observe(&classification(0.0)), Some(0.5));
        assert_eq!(aggregator.observe(&classification(1.0)), Some(2.0 / 3.0));
        assert_eq!(aggregator.total(), 4);
        assert_eq!(aggregator.summary(false).failed, 1);
    }

    #[test]
    fn test_empty_run() {
        let summary = Aggregator::new(Metric::Asr).summary(true);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.average_score, None);
        assert_eq!(summary.median_score, None);
        assert!(summary.interrupted);
    }

    #[test]
    fn test_median() {
        let mut aggregator = Aggregator::new(Metric::Asr);
        for score in [0.9, 0.6, 0.8, 0.7] {
            aggregator.observe(&EvalResult::Lexical(LexicalResult {
                score,
                word_error_rate: 1.0 - score,
            }));
        }
        let median = aggregator.summary(false).median_score.unwrap();
        assert!((median - 0.75).abs() < 1e-9);

        assert_eq!(calculate_median(&[0.2, 0.9, 0.4]), Some(0.4));
    }
}
