//! Task data model: what gets read off the study page, shipped to an oracle,
//! and applied back.
//!
//! Wire names follow the JSON the page adapters and oracles exchange, so the
//! serde renames here are load-bearing: `type`, `question`, `options`, and
//! `previousCorrection` are what actually crosses the bus.

use serde::{Deserialize, Serialize};

/// The shape of a question as the study page presents it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Pick exactly one option (covers true/false as a two-option case).
    SingleChoice,
    /// Pick every option that applies.
    MultiSelect,
    /// Type free text into one or more blanks.
    FillBlank,
    /// Pair each prompt with one choice.
    MatchPairs,
}

impl TaskKind {
    /// Stable lower-case label used in prompts and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::SingleChoice => "single_choice",
            TaskKind::MultiSelect => "multi_select",
            TaskKind::FillBlank => "fill_blank",
            TaskKind::MatchPairs => "match_pairs",
        }
    }
}

/// The option material accompanying a task.
///
/// Flat lists serialize as a JSON array, paired lists as an object with
/// `prompts` and `choices` — the untagged repr keeps the wire format the
/// page adapters emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionSet {
    Flat(Vec<String>),
    Paired {
        prompts: Vec<String>,
        choices: Vec<String>,
    },
}

impl OptionSet {
    /// The empty option set, used by fill-in-the-blank tasks.
    pub fn none() -> Self {
        OptionSet::Flat(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OptionSet::Flat(v) => v.is_empty(),
            OptionSet::Paired { prompts, choices } => prompts.is_empty() && choices.is_empty(),
        }
    }
}

impl Default for OptionSet {
    fn default() -> Self {
        OptionSet::none()
    }
}

/// An answer value: one string or several, depending on the task kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    One(String),
    Many(Vec<String>),
}

impl AnswerValue {
    /// Uniform view over both shapes.
    pub fn items(&self) -> Vec<&str> {
        match self {
            AnswerValue::One(s) => vec![s.as_str()],
            AnswerValue::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            AnswerValue::One(_) => 1,
            AnswerValue::Many(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AnswerValue::Many(v) if v.is_empty())
    }
}

/// What the grader said the right answer was, kept for the next round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    /// Prompt text of the question that was answered wrong.
    #[serde(rename = "question")]
    pub prior_prompt: String,
    /// The correct value(s) the page revealed.
    #[serde(rename = "correctAnswer")]
    pub correct_value: AnswerValue,
}

/// One question lifted off the study page, ready to relay to an oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(rename = "question")]
    pub prompt: String,
    #[serde(default)]
    pub options: OptionSet,
    /// Attached at most once: the correction from the previous round, if the
    /// previous answer was graded incorrect.
    #[serde(
        rename = "previousCorrection",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correction: Option<Correction>,
}

impl Task {
    pub fn new(kind: TaskKind, prompt: impl Into<String>, options: OptionSet) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            options,
            correction: None,
        }
    }
}

/// The parsed payload an oracle produced. Exists only transiently between
/// detection in the chat DOM and application back on the study page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleReply {
    pub answer: AnswerValue,
    #[serde(default)]
    pub explanation: String,
}

/// Result of applying a reply to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Inputs were filled / options were clicked (or the user was told what
    /// to do, for kinds applied by hand).
    pub applied: bool,
    /// Whether a grading verdict can be read back for this kind.
    pub gradable: bool,
}

/// Grading verdict after the page has scored the answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Grading {
    Correct,
    /// Wrong, and the page revealed the right answer.
    Incorrect(Correction),
    /// Wrong or unscored, but no correct answer could be read back.
    Unavailable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_wire_field_names() {
        let task = Task::new(
            TaskKind::SingleChoice,
            "What is 2 + 2?",
            OptionSet::Flat(vec!["3".into(), "4".into(), "5".into()]),
        );
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["type"], "single_choice");
        assert_eq!(v["question"], "What is 2 + 2?");
        assert_eq!(v["options"], json!(["3", "4", "5"]));
        assert!(v.get("previousCorrection").is_none());
    }

    #[test]
    fn test_correction_wire_field_names() {
        let mut task = Task::new(TaskKind::FillBlank, "Water is H2[BLANK]", OptionSet::none());
        task.correction = Some(Correction {
            prior_prompt: "Prior question".into(),
            correct_value: AnswerValue::One("O".into()),
        });
        let v = serde_json::to_value(&task).unwrap();
        assert_eq!(v["previousCorrection"]["question"], "Prior question");
        assert_eq!(v["previousCorrection"]["correctAnswer"], "O");
    }

    #[test]
    fn test_paired_options_roundtrip() {
        let options = OptionSet::Paired {
            prompts: vec!["H2O".into(), "NaCl".into()],
            choices: vec!["water".into(), "salt".into()],
        };
        let v = serde_json::to_value(&options).unwrap();
        assert_eq!(v["prompts"][1], "NaCl");
        let back: OptionSet = serde_json::from_value(v).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn test_answer_value_untagged() {
        let one: AnswerValue = serde_json::from_value(json!("4")).unwrap();
        assert_eq!(one.items(), vec!["4"]);
        let many: AnswerValue = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(many.items(), vec!["a", "b"]);
    }

    #[test]
    fn test_oracle_reply_requires_answer() {
        let ok: Result<OracleReply, _> =
            serde_json::from_str(r#"{"answer": "4", "explanation": "2+2"}"#);
        assert!(ok.is_ok());

        let no_explanation: OracleReply = serde_json::from_str(r#"{"answer": "4"}"#).unwrap();
        assert_eq!(no_explanation.explanation, "");

        let missing: Result<OracleReply, _> = serde_json::from_str(r#"{"explanation": "x"}"#);
        assert!(missing.is_err());
    }
}
