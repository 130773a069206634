//! Strict parsing of free-text judge output

use once_cell::sync::Lazy;
use regex::Regex;

use super::Verdict;
use crate::error::{Error, Result};

/// Instructions sent ahead of every prompt/response pair
pub const JUDGE_INSTRUCTIONS: &str = "You are an evaluator of AI assistant answers. \
Rate how faithful and factually grounded the RESPONSE is for the PROMPT. \
Use a score between 0.0 (entirely hallucinated or wrong) and 1.0 (fully correct and grounded). \
Reply with JSON only, in the form {\"score\": <number>, \"reasoning\": \"<one sentence>\"}.";

static SCORE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"?score"?\s*[:=]\s*"?(-?\d+(?:\.\d+)?)"#).expect("score pattern is valid")
});

/// Build the full judge prompt for one exchange
pub fn judge_prompt(prompt: &str, response: &str) -> String {
    format!("{JUDGE_INSTRUCTIONS}\n\nPROMPT:\n{prompt}\n\nRESPONSE:\n{response}\n")
}

/// Turn judge text into a verdict, or explain why it cannot be trusted
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let score = match score_from_json(raw) {
        Some(score) => score,
        None => score_from_pattern(raw)
            .ok_or_else(|| Error::malformed(raw, "no score found in judge output"))?,
    };

    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(Error::malformed(
            raw,
            format!("score {score} outside [0, 1]"),
        ));
    }

    Ok(Verdict {
        score,
        raw_output: raw.to_string(),
    })
}

/// Look for a JSON object (possibly wrapped in prose or code fences) with a `score` field
fn score_from_json(raw: &str) -> Option<f64> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&raw[start..=end]).ok()?;
    match value.get("score")? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn score_from_pattern(raw: &str) -> Option<f64> {
    SCORE_PATTERN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
