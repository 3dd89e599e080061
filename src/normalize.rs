/// Lower-case `text`, drop punctuation and split it into word tokens.
///
/// Any character that is neither alphanumeric nor whitespace is removed
/// rather than replaced, so "don't" becomes "dont" on both sides of a
/// comparison. Empty or punctuation-only input yields no tokens.
pub fn normalize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();

    cleaned.split_whitespace().map(str::to_string).collect()
}
