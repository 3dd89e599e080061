use crate::config::JudgeConfig;
use crate::error::EvalError;
use crate::models::{InstructResult, Sample};
use crate::rating::RatingClient;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Score and rationale parsed from a judge reply, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub score: f64,
    pub reason: String,
}

/// Why a single judge attempt failed
#[derive(Debug)]
enum AttemptFailure {
    Transport(String),
    Format(String),
}

/// Scores answers by asking an external rating model.
///
/// The judge replies either with a JSON object holding `score` and `reason`,
/// or with labeled `Score:` / `Reason:` lines. Scores must lie in
/// `[0, score_scale]` and are divided by `score_scale`.
pub struct Judge {
    client: Box<dyn RatingClient>,
    system_prompt: String,
    user_prompt: String,
    score_scale: f64,
    retry: RetryPolicy,
}

impl Judge {
    pub fn new(client: Box<dyn RatingClient>, config: &JudgeConfig) -> Self {
        Self {
            client,
            system_prompt: config.system_prompt.clone(),
            user_prompt: config.user_prompt.clone(),
            score_scale: config.score_scale,
            retry: RetryPolicy::from(config),
        }
    }

    /// Name of the rating model
    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    /// Highest raw score the judge may award
    pub fn score_scale(&self) -> f64 {
        self.score_scale
    }

    /// Rate one sample, retrying transport and parse failures
    pub async fn rate(&self, sample: &Sample) -> Result<InstructResult, EvalError> {
        let system_prompt = render_template(&self.system_prompt, sample);
        let user_prompt = render_template(&self.user_prompt, sample);

        let mut last_failure = AttemptFailure::Transport("no attempt made".to_string());

        for attempt in 1..=self.retry.max_attempts {
            match self.attempt(&system_prompt, &user_prompt).await {
                Ok(rating) => {
                    debug!(attempt, score = rating.score, "judge rating parsed");
                    return Ok(InstructResult {
                        score: rating.score / self.score_scale,
                        reason: rating.reason,
                    });
                }
                Err(failure) => {
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        failure = ?failure,
                        "judge attempt failed"
                    );
                    last_failure = failure;
                }
            }

            if attempt < self.retry.max_attempts {
                sleep(self.retry.delay_after(attempt)).await;
            }
        }

        let attempts = self.retry.max_attempts;
        Err(match last_failure {
            AttemptFailure::Transport(message) => EvalError::JudgeUnavailable { attempts, message },
            AttemptFailure::Format(message) => EvalError::JudgeFormat { attempts, message },
        })
    }

    async fn attempt(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Rating, AttemptFailure> {
        let text = self
            .client
            .rate(system_prompt, user_prompt)
            .await
            .map_err(|e| AttemptFailure::Transport(e.to_string()))?;

        parse_rating(&text, self.score_scale).map_err(|e| AttemptFailure::Format(format!("{:#}", e)))
    }
}

/// Substitute the sample's fields into a prompt template
pub fn render_template(template: &str, sample: &Sample) -> String {
    template
        .replace("{question}", &sample.question)
        .replace("{expected_answer}", &sample.expected_answer)
        .replace("{generated_answer}", &sample.generated_answer)
}

/// Parse a judge reply into a score in `[0, score_scale]` and a rationale
pub fn parse_rating(response: &str, score_scale: f64) -> Result<Rating> {
    let rating = match parse_json_rating(response) {
        Some(rating) => rating,
        None => parse_labeled_rating(response)?,
    };

    if !rating.score.is_finite() || rating.score < 0.0 || rating.score > score_scale {
        anyhow::bail!("score {} outside of [0, {}]", rating.score, score_scale);
    }
    if rating.reason.is_empty() {
        anyhow::bail!("judge gave no reason");
    }

    Ok(rating)
}

/// Try to read `{"score": .., "reason": ..}`, possibly embedded in text
fn parse_json_rating(response: &str) -> Option<Rating> {
    let parsed = parse_json_response(response)?;

    let score = match parsed.get("score")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let reason = parsed
        .get("reason")
        .or_else(|| parsed.get("explanation"))
        .and_then(Value::as_str)?
        .trim()
        .to_string();

    Some(Rating { score, reason })
}

fn parse_json_response(response: &str) -> Option<Value> {
    if let Ok(parsed) = serde_json::from_str::<Value>(response.trim()) {
        return Some(parsed);
    }

    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

#[derive(Clone, Copy, PartialEq)]
enum Label {
    Score,
    Reason,
}

/// Split off a leading `Score:` / `Reason:` / `Explanation:` label
fn strip_label(line: &str) -> Option<(Label, &str)> {
    let trimmed = line
        .trim()
        .trim_start_matches(|c: char| c == '*' || c == '#' || c == '-' || c.is_whitespace());
    let (label, rest) = trimmed.split_once(':')?;
    let label = label.trim().trim_end_matches('*').trim().to_ascii_lowercase();
    let rest = rest.trim_start_matches('*').trim();

    match label.as_str() {
        "score" | "rating" => Some((Label::Score, rest)),
        "reason" | "explanation" | "rationale" => Some((Label::Reason, rest)),
        _ => None,
    }
}

fn parse_labeled_rating(response: &str) -> Result<Rating> {
    let mut score_text: Option<&str> = None;
    let mut reason_lines: Vec<&str> = Vec::new();
    let mut in_reason = false;

    for line in response.lines() {
        match strip_label(line) {
            Some((Label::Score, rest)) => {
                score_text.get_or_insert(rest);
                in_reason = false;
            }
            Some((Label::Reason, rest)) => {
                reason_lines.push(rest);
                in_reason = true;
            }
            None if in_reason => reason_lines.push(line.trim()),
            None => {}
        }
    }

    let score_text = score_text.context("no `Score:` field in judge response")?;
    let score = leading_number(score_text)
        .with_context(|| format!("`Score:` field has no number: {:?}", score_text))?;

    let reason = reason_lines.join("\n").trim().to_string();
    if reason.is_empty() {
        anyhow::bail!("no `Reason:` field in judge response");
    }

    Ok(Rating { score, reason })
}

/// First decimal number in `text`, sign included, e.g. "4/5" -> 4.0,
/// "**1** point" -> 1.0, "-1" -> -1.0, ".5" -> 0.5
fn leading_number(text: &str) -> Option<f64> {
    let bytes = text.as_bytes();
    let start = (0..bytes.len()).find(|&i| {
        matches!(
            &bytes[i..],
            [b'0'..=b'9', ..]
                | [b'-' | b'+' | b'.', b'0'..=b'9', ..]
                | [b'-' | b'+', b'.', b'0'..=b'9', ..]
        )
    })?;

    let len = text[start..]
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == '-' || c == '+')))
        .count();
    text[start..start + len].trim_end_matches('.').parse().ok()
}
