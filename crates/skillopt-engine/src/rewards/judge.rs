//! Judge response harness
//!
//! LLM-as-judge calls are expected to return a strict JSON object of shape
//! `{score, reasoning?, metadata?}`. Models wrap replies in markdown fences,
//! prepend prose, or return garbage; the harness deals with all of it and
//! degrades to a recorded neutral verdict rather than failing the caller.

use serde_json::Value;

/// Neutral score recorded whenever a judge reply cannot be used.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Parsed outcome of one judge call.
#[derive(Debug, Clone)]
pub struct JudgeVerdict {
    /// Score in [0, 1]
    pub score: f64,
    /// Judge's one-line justification, when provided
    pub reasoning: Option<String>,
    /// Free-form extra fields, when provided
    pub metadata: Option<Value>,
    /// True when the reply was unusable and the neutral score was recorded
    pub fallback: bool,
}

impl JudgeVerdict {
    /// The neutral verdict recorded on parse or bounds failure.
    pub fn neutral() -> Self {
        Self {
            score: NEUTRAL_SCORE,
            reasoning: None,
            metadata: None,
            fallback: true,
        }
    }
}

/// JSON schema the judge is asked to match.
pub fn verdict_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "score": {"type": "number", "minimum": 0.0, "maximum": 1.0},
            "reasoning": {"type": "string"},
            "metadata": {"type": "object"}
        },
        "required": ["score"]
    })
}

/// Parse a raw judge reply into a verdict. Never fails: any reply that is
/// not a JSON object with a `score` number inside [0, 1] becomes the
/// neutral fallback verdict.
pub fn parse_verdict(raw: &str) -> JudgeVerdict {
    let Some(object) = parse_object(raw) else {
        return JudgeVerdict::neutral();
    };

    let Some(score) = object.get("score").and_then(Value::as_f64) else {
        return JudgeVerdict::neutral();
    };
    if !(0.0..=1.0).contains(&score) || !score.is_finite() {
        return JudgeVerdict::neutral();
    }

    JudgeVerdict {
        score,
        reasoning: object
            .get("reasoning")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata: object.get("metadata").filter(|m| m.is_object()).cloned(),
        fallback: false,
    }
}

/// Extract and parse the first JSON object from a reply, tolerating
/// markdown fences and surrounding prose. Returns `None` when nothing
/// parseable is found.
pub fn parse_object(raw: &str) -> Option<Value> {
    let text = strip_fences(raw);

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }

    let parsed: Value = serde_json::from_str(&text[start..=end]).ok()?;
    parsed.is_object().then_some(parsed)
}

/// Drop a surrounding markdown code fence, if present.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the optional language identifier on the opening fence
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let verdict = parse_verdict(r#"{"score": 0.8, "reasoning": "on topic"}"#);
        assert!(!verdict.fallback);
        assert!((verdict.score - 0.8).abs() < 1e-12);
        assert_eq!(verdict.reasoning.as_deref(), Some("on topic"));
    }

    #[test]
    fn test_fenced_json() {
        let raw = "```json\n{\"score\": 0.25}\n```";
        let verdict = parse_verdict(raw);
        assert!(!verdict.fallback);
        assert!((verdict.score - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_json_with_surrounding_prose() {
        let raw = "Here is my assessment:\n{\"score\": 1.0}\nHope that helps!";
        let verdict = parse_verdict(raw);
        assert!(!verdict.fallback);
        assert!((verdict.score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_json_falls_back() {
        let verdict = parse_verdict("oops");
        assert!(verdict.fallback);
        assert!((verdict.score - NEUTRAL_SCORE).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_bounds_score_falls_back() {
        assert!(parse_verdict(r#"{"score": 1.5}"#).fallback);
        assert!(parse_verdict(r#"{"score": -0.1}"#).fallback);
    }

    #[test]
    fn test_missing_score_falls_back() {
        assert!(parse_verdict(r#"{"reasoning": "no score"}"#).fallback);
    }

    #[test]
    fn test_non_object_json_falls_back() {
        assert!(parse_verdict("[0.5]").fallback);
        assert!(parse_verdict("0.5").fallback);
    }

    #[test]
    fn test_metadata_must_be_object() {
        let verdict = parse_verdict(r#"{"score": 0.5, "metadata": "stringy"}"#);
        assert!(!verdict.fallback);
        assert!(verdict.metadata.is_none());

        let verdict = parse_verdict(r#"{"score": 0.5, "metadata": {"k": 1}}"#);
        assert_eq!(verdict.metadata.unwrap()["k"], 1);
    }

    #[test]
    fn test_parse_object_handles_fence_without_language() {
        let parsed = parse_object("```\n{\"criteria\": \"be helpful\"}\n```").unwrap();
        assert_eq!(parsed["criteria"], "be helpful");
    }
}
