//! Heuristic extraction from positive feedback.
//!
//! After the user confirms a response helped, the LLM is asked to distill
//! a generalizable condition→action pattern. Extractions pass quality
//! gates before anything is persisted: the output must parse, the
//! condition must be long enough to mean something, and near-duplicates
//! of existing same-source heuristics are rejected upstream.

use gladys_core::heuristic::DEFAULT_SIMILARITY_THRESHOLD;
use serde::Deserialize;
use thiserror::Error;

use crate::llm::ChatMessage;

/// Minimum length for an extracted condition text.
pub const MIN_CONDITION_LEN: usize = 5;

/// Extraction quality-gate failures.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExtractionError {
    /// The LLM output was not the requested JSON object.
    #[error("extraction_parse_failed")]
    ParseFailed,

    /// The condition text is too short to generalize.
    #[error("condition_too_short")]
    ConditionTooShort,

    /// The action message is empty.
    #[error("empty_action")]
    EmptyAction,
}

/// A parsed extraction, pre-dedup.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub condition_text: String,
    pub action_message: String,
    pub similarity_threshold: f64,
}

#[derive(Deserialize)]
struct RawExtraction {
    condition_text: String,
    action: RawAction,
    similarity_threshold: Option<f64>,
}

#[derive(Deserialize)]
struct RawAction {
    message: String,
}

/// Prompt asking the LLM to distill a reusable pattern.
#[must_use]
pub fn extraction_prompt(event_text: &str, response_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You distill reusable rules from situations that were handled well. \
             Reply with a single JSON object and nothing else: \
             {\"condition_text\": \"<generalized description of the situation>\", \
             \"action\": {\"message\": \"<what to do when it recurs>\"}, \
             \"similarity_threshold\": <optional number 0-1>}. \
             Generalize the condition past incidental details (names, numbers, \
             exact wording) while keeping what makes the situation recognizable.",
        ),
        ChatMessage::user(format!(
            "Situation: {event_text}\n\nResponse that helped: {response_text}"
        )),
    ]
}

/// Parse and gate an extraction reply.
///
/// Tolerates surrounding prose by slicing from the first `{` to the last
/// `}` before parsing, since models love to narrate around their JSON.
pub fn parse_extraction(reply: &str) -> Result<Extraction, ExtractionError> {
    let start = reply.find('{').ok_or(ExtractionError::ParseFailed)?;
    let end = reply.rfind('}').ok_or(ExtractionError::ParseFailed)?;
    if end < start {
        return Err(ExtractionError::ParseFailed);
    }
    let raw: RawExtraction =
        serde_json::from_str(&reply[start..=end]).map_err(|_| ExtractionError::ParseFailed)?;

    let condition_text = raw.condition_text.trim().to_string();
    if condition_text.len() < MIN_CONDITION_LEN {
        return Err(ExtractionError::ConditionTooShort);
    }
    let action_message = raw.action.message.trim().to_string();
    if action_message.is_empty() {
        return Err(ExtractionError::EmptyAction);
    }

    let similarity_threshold = raw
        .similarity_threshold
        .filter(|t| t.is_finite() && (0.0..=1.0).contains(t))
        .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);

    Ok(Extraction {
        condition_text,
        action_message,
        similarity_threshold,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::float_cmp)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_clean_extraction() {
        let reply = r#"{"condition_text": "player health critically low in combat",
            "action": {"message": "advise retreating and healing"},
            "similarity_threshold": 0.8}"#;
        let extraction = parse_extraction(reply).unwrap();
        assert_eq!(
            extraction.condition_text,
            "player health critically low in combat"
        );
        assert_eq!(extraction.action_message, "advise retreating and healing");
        assert_eq!(extraction.similarity_threshold, 0.8);
    }

    #[test]
    fn tolerates_prose_around_the_json() {
        let reply = "Sure! Here is the rule:\n{\"condition_text\": \"inbox contains an urgent deadline\", \"action\": {\"message\": \"surface it immediately\"}}\nHope that helps.";
        let extraction = parse_extraction(reply).unwrap();
        assert_eq!(
            extraction.similarity_threshold,
            DEFAULT_SIMILARITY_THRESHOLD
        );
    }

    #[test]
    fn rejects_non_json_replies() {
        assert_eq!(
            parse_extraction("I could not find a pattern."),
            Err(ExtractionError::ParseFailed)
        );
        assert_eq!(parse_extraction("}{"), Err(ExtractionError::ParseFailed));
    }

    #[test]
    fn rejects_short_conditions() {
        let reply = r#"{"condition_text": "hp", "action": {"message": "heal"}}"#;
        assert_eq!(
            parse_extraction(reply),
            Err(ExtractionError::ConditionTooShort)
        );
    }

    #[test]
    fn rejects_empty_actions() {
        let reply = r#"{"condition_text": "player low on health", "action": {"message": "  "}}"#;
        assert_eq!(parse_extraction(reply), Err(ExtractionError::EmptyAction));
    }

    #[test]
    fn out_of_range_thresholds_fall_back_to_default() {
        let reply = r#"{"condition_text": "player low on health",
            "action": {"message": "heal"}, "similarity_threshold": 7.5}"#;
        let extraction = parse_extraction(reply).unwrap();
        assert_eq!(
            extraction.similarity_threshold,
            DEFAULT_SIMILARITY_THRESHOLD
        );
    }
}
