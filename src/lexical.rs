use crate::models::{LexicalResult, Sample};
use crate::normalize::normalize;

/// Score a transcript against its reference using word error rate
pub fn score(sample: &Sample) -> LexicalResult {
    let reference = normalize(&sample.expected_answer);
    let hypothesis = normalize(&sample.generated_answer);

    let wer = word_error_rate(&reference, &hypothesis);

    LexicalResult {
        score: (1.0 - wer).clamp(0.0, 1.0),
        word_error_rate: wer,
    }
}

/// Edit distance over the reference length (at least 1).
/// Not symmetric: the reference is always the denominator.
pub fn word_error_rate(reference: &[String], hypothesis: &[String]) -> f64 {
    let distance = edit_distance(reference, hypothesis);
    distance as f64 / reference.len().max(1) as f64
}

/// Levenshtein distance between two token sequences, unit costs
pub fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, token_a) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, token_b) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(token_a != token_b);
            let deletion = previous[j + 1] + 1;
            let insertion = current[j] + 1;
            current[j + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
