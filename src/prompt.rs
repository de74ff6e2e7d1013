//! Prompt construction: turning a [`Task`] into the text typed at an oracle.
//!
//! This is a pure function of the task. Every oracle variant sends the same
//! text; only the typing mechanics differ per site. Keeping it here means the
//! wording is pinned by unit tests instead of drifting per adapter.

use crate::task::{OptionSet, Task, TaskKind};

/// Instruction appended to every prompt so replies come back machine-readable.
const FORMAT_SUFFIX: &str = "\n\nPlease provide your answer in JSON format with keys \"answer\" \
     and \"explanation\". Explanations should be no more than one sentence. DO NOT acknowledge \
     the correction in your response, only answer the new question.";

/// Render the full prompt text for a task.
pub fn format_prompt(task: &Task) -> String {
    let mut text = format!("Type: {}\nQuestion: {}", task.kind.label(), task.prompt);

    if let Some(correction) = &task.correction {
        let correct_json = serde_json::to_string(&correction.correct_value)
            .unwrap_or_else(|_| "\"unknown\"".to_string());
        text = format!(
            "CORRECTION FROM PREVIOUS ANSWER: For the question \"{}\", your answer was \
             incorrect. The correct answer was: {}\n\nNow answer this new question:\n\n{}",
            correction.prior_prompt, correct_json, text
        );
    }

    match (&task.kind, &task.options) {
        (TaskKind::MatchPairs, OptionSet::Paired { prompts, choices }) => {
            text.push_str("\nPrompts:\n");
            text.push_str(&numbered(prompts));
            text.push_str("\nChoices:\n");
            text.push_str(&numbered(choices));
            text.push_str(
                "\n\nPlease match each prompt with the correct choice. Format your answer as \
                 an array where each element is 'Prompt -> Choice'.",
            );
        }
        (TaskKind::FillBlank, _) => {
            text.push_str(
                "\n\nThis is a fill in the blank question. If there are multiple blanks, \
                 provide answers as an array in order of appearance. For a single blank, you \
                 can provide a string.",
            );
        }
        (_, OptionSet::Flat(options)) if !options.is_empty() => {
            text.push_str("\nOptions:\n");
            text.push_str(&numbered(options));
            text.push_str(
                "\n\nIMPORTANT: Your answer must EXACTLY match one of the above options. Do \
                 not include numbers in your answer. If there are periods, include them.",
            );
        }
        _ => {}
    }

    text.push_str(FORMAT_SUFFIX);
    text
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}
