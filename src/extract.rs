//! Reply extraction: finding the structured payload inside free-form chat
//! output.
//!
//! Oracles are asked for a JSON object but wrap it in anything from a tidy
//! fenced code block to prose with the object buried mid-paragraph. The
//! ladder here runs strictest-first: self-described JSON blocks, then a
//! brace-delimited span of the full text, then (only after a grace period,
//! and never while the output is still streaming) a loose pattern that just
//! wants both required keys somewhere between braces.
//!
//! Every oracle variant feeds the same ladder. What differs per site is how
//! an [`OutputSnapshot`] gets built, not how it is read.

use crate::task::{AnswerValue, OracleReply};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// One output element from a chat page, in extraction-ready form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSnapshot {
    /// Fenced code blocks found inside the element, with their info strings.
    #[serde(default)]
    pub blocks: Vec<FencedBlock>,
    /// Full text content of the element.
    #[serde(default)]
    pub text: String,
    /// Whether the page still marks this element as being generated.
    #[serde(default)]
    pub streaming: bool,
}

/// A fenced code block plus whatever language hint the page attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FencedBlock {
    /// Info string or class list text, e.g. `language-json`. `None` when the
    /// page attached no hint at all.
    #[serde(default)]
    pub info: Option<String>,
    pub text: String,
}

impl FencedBlock {
    /// Candidate blocks either self-describe as JSON or carry no hint.
    fn looks_like_json(&self) -> bool {
        match &self.info {
            Some(info) => info.to_lowercase().contains("json"),
            None => true,
        }
    }
}

fn newline_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*").unwrap())
}

fn answer_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{[\s\S]*?"answer"[\s\S]*?\}"#).unwrap())
}

fn loose_span() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{[\s\S]*?"answer"[\s\S]*?"explanation"[\s\S]*?\}"#).unwrap())
}

/// Strip zero-width characters and collapse newline runs to single spaces.
///
/// Chat pages pad copied text with U+200B..U+200D and U+FEFF, which break
/// JSON parsing invisibly, so this runs before every parse attempt.
pub fn scrub(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .collect();
    newline_runs().replace_all(&stripped, " ").trim().to_string()
}

/// Parse a reply payload, scrubbing first. `None` when the text is not a
/// JSON object carrying a non-empty `answer`.
pub fn parse_reply(raw: &str) -> Option<OracleReply> {
    let cleaned = scrub(raw);
    parse_cleaned(&cleaned)
}

fn parse_cleaned(cleaned: &str) -> Option<OracleReply> {
    let reply: OracleReply = serde_json::from_str(cleaned).ok()?;
    match &reply.answer {
        AnswerValue::One(s) if s.trim().is_empty() => None,
        _ => Some(reply),
    }
}

/// Widest brace-delimited span: first `{` through last `}`.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Run the extraction ladder over one output element.
///
/// Returns the scrubbed payload string to hand upstream. `elapsed` is time
/// since observation started; the loose pattern only fires once it exceeds
/// `grace` and the element is no longer streaming.
pub fn extract_payload(
    snapshot: &OutputSnapshot,
    elapsed: Duration,
    grace: Duration,
) -> Option<String> {
    // 1. Fenced blocks that plausibly hold JSON, in document order.
    for block in &snapshot.blocks {
        if !block.looks_like_json() {
            continue;
        }
        let cleaned = scrub(&block.text);
        if parse_cleaned(&cleaned).is_some() {
            return Some(cleaned);
        }
    }

    // 2. Widest brace span of the full text, then the narrower span that
    // at least contains the answer key.
    if let Some(span) = brace_span(&snapshot.text) {
        let cleaned = scrub(span);
        if parse_cleaned(&cleaned).is_some() {
            return Some(cleaned);
        }
    }
    if let Some(m) = answer_span().find(&snapshot.text) {
        let cleaned = scrub(m.as_str());
        if parse_cleaned(&cleaned).is_some() {
            return Some(cleaned);
        }
    }

    // 3. Last resort after the grace period: both keys present between
    // braces is good enough, parse or no parse. Skipped while the element
    // is still streaming since a truncated object would match.
    if !snapshot.streaming && elapsed > grace {
        if let Some(m) = loose_span().find(&snapshot.text) {
            return Some(scrub(m.as_str()));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const GRACE: Duration = Duration::from_secs(30);

    fn snap(text: &str) -> OutputSnapshot {
        OutputSnapshot {
            blocks: Vec::new(),
            text: text.to_string(),
            streaming: false,
        }
    }

    #[test]
    fn test_scrub_strips_zero_width_and_collapses_newlines() {
        let raw = "{\u{200B}\"answer\":\n    \"4\",\n  \"explanation\": \"sum\"\u{FEFF}}";
        assert_eq!(scrub(raw), r#"{"answer": "4", "explanation": "sum"}"#);
    }

    #[test]
    fn test_parse_reply_requires_nonempty_answer() {
        assert!(parse_reply(r#"{"answer": "4", "explanation": "x"}"#).is_some());
        assert!(parse_reply(r#"{"answer": "", "explanation": "x"}"#).is_none());
        assert!(parse_reply(r#"{"explanation": "x"}"#).is_none());
        assert!(parse_reply("not json at all").is_none());
    }

    #[test]
    fn test_fenced_json_block_wins() {
        let snapshot = OutputSnapshot {
            blocks: vec![
                FencedBlock {
                    info: Some("language-python".into()),
                    text: r#"{"answer": "wrong block"}"#.into(),
                },
                FencedBlock {
                    info: Some("language-json".into()),
                    text: "{\"answer\": \"4\",\n \"explanation\": \"sum\"}".into(),
                },
            ],
            text: "Here is my reasoning...".into(),
            streaming: false,
        };
        let payload = extract_payload(&snapshot, Duration::from_secs(1), GRACE).unwrap();
        assert!(payload.contains("\"4\""));
        assert!(!payload.contains("wrong block"));
    }

    #[test]
    fn test_unlabelled_block_is_a_candidate() {
        let snapshot = OutputSnapshot {
            blocks: vec![FencedBlock {
                info: None,
                text: r#"{"answer": "4", "explanation": "sum"}"#.into(),
            }],
            text: String::new(),
            streaming: false,
        };
        assert!(extract_payload(&snapshot, Duration::from_secs(1), GRACE).is_some());
    }

    #[test]
    fn test_brace_span_fallback_from_prose() {
        let snapshot = snap(
            "Sure! The answer is 4. {\"answer\": \"4\", \"explanation\": \"basic sum\"} Hope that helps.",
        );
        let payload = extract_payload(&snapshot, Duration::from_secs(1), GRACE).unwrap();
        assert_eq!(
            payload,
            r#"{"answer": "4", "explanation": "basic sum"}"#
        );
    }

    #[test]
    fn test_narrow_span_recovers_when_wide_span_is_broken() {
        // Stray braces after the object break the widest span; the span
        // ending at the first close brace past the answer key still parses.
        let snapshot = snap(r#"{"answer": "4", "explanation": "sum"} then { weird }"#);
        assert!(extract_payload(&snapshot, Duration::from_secs(1), GRACE).is_some());
    }

    #[test]
    fn test_loose_path_needs_grace_elapsed() {
        // Trailing comma: never parses, but holds both keys.
        let text = r#"{"answer": "4", "explanation": "sum",}"#;
        let snapshot = snap(text);
        assert!(extract_payload(&snapshot, Duration::from_secs(5), GRACE).is_none());
        let payload = extract_payload(&snapshot, Duration::from_secs(31), GRACE).unwrap();
        assert!(payload.contains("\"answer\""));
        assert!(payload.contains("\"explanation\""));
    }

    #[test]
    fn test_loose_path_skipped_while_streaming() {
        let mut snapshot = snap(r#"{"answer": "4", "explanation": "sum",}"#);
        snapshot.streaming = true;
        assert!(extract_payload(&snapshot, Duration::from_secs(31), GRACE).is_none());
    }

    #[test]
    fn test_no_payload_in_plain_prose() {
        let snapshot = snap("The answer is four.");
        assert!(extract_payload(&snapshot, Duration::from_secs(31), GRACE).is_none());
    }
}
