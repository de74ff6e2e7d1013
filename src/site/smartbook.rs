//! SmartBook adapter: the [`SitePage`] implementation for the study site.
//!
//! All scripts evaluate inside the study tab and return JSON the adapter
//! deserializes. Selectors follow the page's own automation ids and probe
//! classes; the apply step branches on what the page shows rather than on a
//! remembered kind, so a page that changed under us is handled the way it
//! looks now.

use super::{PageState, SitePage};
use crate::cdp::{js, CdpPage};
use crate::task::{AnswerValue, ApplyOutcome, Correction, Grading, OracleReply, Task};
use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Upper bound for the page to produce a control we are waiting on.
const BOUNDED_WAIT: Duration = Duration::from_secs(10);

const CONFIDENCE_READY: &str =
    r#"[data-automation-id="confidence-buttons--high_confidence"]:not([disabled])"#;
const READ_BUTTON: &str = r#"[data-automation-id="lr-tray_reading-button"]"#;
const TO_QUESTIONS_BUTTON: &str = r#"[data-automation-id="reading-questions-button"]"#;
const NEXT_BUTTON: &str = ".next-button";

/// Classify what the page is showing, overview first so a leftover question
/// container behind an interstitial is not misread.
const PROBE_SCRIPT: &str = r#"(() => {
    const continueButton = document.querySelector(
        'awd-topic-overview-button-bar .next-button, .button-bar-wrapper .next-button'
    );
    if (continueButton && continueButton.textContent.trim().toLowerCase().includes('continue')) {
        return 'overview';
    }
    if (document.querySelector('.forced-learning .alert-error')
        && document.querySelector('[data-automation-id="lr-tray_reading-button"]')) {
        return 'forced_reading';
    }
    const container = document.querySelector('.probe-container');
    if (container && !container.querySelector('.forced-learning')) {
        return 'question';
    }
    return 'idle';
})()"#;

/// Lift the on-screen question into the task wire shape, or null when the
/// container is missing or not readable as a question.
const PARSE_SCRIPT: &str = r#"(() => {
    const container = document.querySelector('.probe-container');
    if (!container) return null;

    let kind = null;
    if (container.querySelector('.awd-probe-type-multiple_choice')) kind = 'single_choice';
    else if (container.querySelector('.awd-probe-type-true_false')) kind = 'single_choice';
    else if (container.querySelector('.awd-probe-type-multiple_select')) kind = 'multi_select';
    else if (container.querySelector('.awd-probe-type-fill_in_the_blank')) kind = 'fill_blank';
    else if (container.querySelector('.awd-probe-type-matching')) kind = 'match_pairs';
    if (!kind) return null;

    let question = '';
    const promptEl = container.querySelector('.prompt');
    if (kind === 'fill_blank' && promptEl) {
        const clone = promptEl.cloneNode(true);
        clone.querySelectorAll(
            'span.fitb-span, span.blank-label, span.correctness, span._visuallyHidden'
        ).forEach((span) => span.remove());
        clone.querySelectorAll('input.fitb-input').forEach((input) => {
            if (input.parentNode) {
                input.parentNode.replaceChild(document.createTextNode('[BLANK]'), input);
            }
        });
        question = clone.textContent.trim();
    } else {
        question = promptEl ? promptEl.textContent.trim() : '';
    }
    if (!question) return null;

    let options = [];
    if (kind === 'match_pairs') {
        options = {
            prompts: Array.from(container.querySelectorAll('.match-prompt .content'))
                .map((el) => el.textContent.trim()),
            choices: Array.from(container.querySelectorAll('.choices-container .content'))
                .map((el) => el.textContent.trim()),
        };
    } else if (kind !== 'fill_blank') {
        options = Array.from(container.querySelectorAll('.choiceText'))
            .map((el) => el.textContent.trim());
    }

    return { type: kind, question: question, options: options };
})()"#;

/// Overview continue control, re-checked at click time.
const CONTINUE_SCRIPT: &str = r#"(() => {
    const button = document.querySelector(
        'awd-topic-overview-button-bar .next-button, .button-bar-wrapper .next-button'
    );
    if (button && button.textContent.trim().toLowerCase().includes('continue')) {
        button.click();
        return { success: true };
    }
    return { success: false };
})()"#;

/// Read the grading verdict and, for incorrect answers, the revealed
/// correction. Matching is never auto-graded.
const GRADE_SCRIPT: &str = r#"(() => {
    const container = document.querySelector('.probe-container');
    if (!container) return { verdict: 'unavailable' };
    if (!container.querySelector('.awd-probe-correctness.incorrect')) {
        return { verdict: 'correct' };
    }

    let kind = '';
    if (container.querySelector('.awd-probe-type-multiple_choice')) kind = 'multiple_choice';
    else if (container.querySelector('.awd-probe-type-true_false')) kind = 'true_false';
    else if (container.querySelector('.awd-probe-type-multiple_select')) kind = 'multiple_select';
    else if (container.querySelector('.awd-probe-type-fill_in_the_blank')) kind = 'fill_in_the_blank';
    else if (container.querySelector('.awd-probe-type-matching')) kind = 'matching';
    if (kind === 'matching') return { verdict: 'unavailable' };

    let question = '';
    const promptEl = container.querySelector('.prompt');
    if (kind === 'fill_in_the_blank' && promptEl) {
        const clone = promptEl.cloneNode(true);
        clone.querySelectorAll(
            'span.response-container, span.fitb-span, span.blank-label, span.correctness, span._visuallyHidden'
        ).forEach((span) => span.remove());
        clone.querySelectorAll('input.fitb-input').forEach((input) => {
            if (input.parentNode) {
                input.parentNode.replaceChild(document.createTextNode('[BLANK]'), input);
            }
        });
        question = clone.textContent.trim();
    } else {
        question = promptEl ? promptEl.textContent.trim() : '';
    }

    let answer = null;
    if (kind === 'multiple_choice' || kind === 'true_false') {
        const picked = container.querySelector('.answer-container .choiceText');
        if (picked) {
            answer = picked.textContent.trim();
        } else {
            const revealed = container.querySelector('.correct-answer-container');
            if (revealed) {
                const text = revealed.querySelector('.choiceText');
                if (text) {
                    answer = text.textContent.trim();
                } else {
                    const choice = revealed.querySelector('.choice');
                    if (choice) answer = choice.textContent.trim();
                }
            }
        }
    } else if (kind === 'multiple_select') {
        const revealed = container.querySelectorAll('.correct-answer-container .choice');
        if (revealed.length > 0) {
            answer = Array.from(revealed).map((el) => {
                const text = el.querySelector('.choiceText');
                return text ? text.textContent.trim() : el.textContent.trim();
            });
        }
    } else if (kind === 'fill_in_the_blank') {
        const fields = container.querySelectorAll('.correct-answers');
        if (fields.length === 1) {
            const el = fields[0].querySelector('.correct-answer');
            if (el) {
                answer = el.textContent.trim();
            } else {
                const text = fields[0].textContent.trim();
                if (text) {
                    const found = text.match(/:\s*(.+)$/);
                    answer = found ? found[1].trim() : text;
                }
            }
        } else if (fields.length > 1) {
            answer = Array.from(fields).map((field) => {
                const el = field.querySelector('.correct-answer');
                if (el) return el.textContent.trim();
                const text = field.textContent.trim();
                const found = text.match(/:\s*(.+)$/);
                return found ? found[1].trim() : text;
            });
        }
    }

    if (answer === null) return { verdict: 'unavailable' };
    return { verdict: 'incorrect', question: question, answer: answer };
})()"#;

fn exists_script(selector: &str) -> String {
    format!("!!document.querySelector('{}')", js::js_string(selector))
}

fn click_script(selector: &str) -> String {
    format!(
        r#"(() => {{
            const el = document.querySelector('{}');
            if (el) {{ el.click(); return {{ success: true }}; }}
            return {{ success: false }};
        }})()"#,
        js::js_string(selector)
    )
}

/// Land the answer on whatever question kind the page currently shows.
/// Match-pairs is announced to the user instead of clicked in.
fn apply_script(answer: &AnswerValue) -> String {
    let answers = js::js_string_array(&answer.items());
    format!(
        r#"(() => {{
            const container = document.querySelector('.probe-container');
            if (!container) return {{ mode: 'missing' }};
            const answers = {answers};

            if (container.querySelector('.awd-probe-type-matching')) {{
                const text = 'Matching Question Solution:\n\n' + answers.join('\n')
                    + '\n\nPlease input these matches manually, then click high confidence and next.';
                setTimeout(() => alert(text), 0);
                return {{ mode: 'announced' }};
            }}

            if (container.querySelector('.awd-probe-type-fill_in_the_blank')) {{
                let touched = 0;
                container.querySelectorAll('input.fitb-input').forEach((input, index) => {{
                    if (answers[index]) {{
                        input.value = answers[index];
                        input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        touched += 1;
                    }}
                }});
                return {{ mode: 'filled', touched: touched }};
            }}

            let touched = 0;
            container.querySelectorAll('input[type="radio"], input[type="checkbox"]').forEach((choice) => {{
                const label = choice.closest('label');
                if (!label) return;
                const choiceText = label.querySelector('.choiceText')?.textContent.trim();
                if (!choiceText) return;
                const wanted = answers.some((ans) => {{
                    if (choiceText === ans) return true;
                    if (choiceText.replace(/\.$/, '') === ans.replace(/\.$/, '')) return true;
                    return choiceText === ans + '.';
                }});
                if (wanted) {{
                    choice.click();
                    touched += 1;
                }}
            }});
            return {{ mode: 'clicked', touched: touched }};
        }})()"#
    )
}

#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum ApplyReport {
    Missing,
    Announced,
    Filled { touched: usize },
    Clicked { touched: usize },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
enum GradeReport {
    Correct,
    Incorrect { question: String, answer: AnswerValue },
    Unavailable,
}

fn field_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Field \d+:\s*").unwrap())
}

/// Normalize a revealed correct value: strip the field label the page
/// prefixes blank answers with, and keep only the first of alternatives
/// joined by " or ".
fn clean_one(value: &str) -> String {
    let trimmed = value.trim();
    let stripped = field_prefix().replace(trimmed, "");
    let first = match stripped.split_once(" or ") {
        Some((first, _)) => first,
        None => stripped.as_ref(),
    };
    first.trim().to_string()
}

fn clean_correct_value(value: AnswerValue) -> AnswerValue {
    match value {
        AnswerValue::One(s) => AnswerValue::One(clean_one(&s)),
        AnswerValue::Many(v) => AnswerValue::Many(v.iter().map(|s| clean_one(s)).collect()),
    }
}

fn grading_from(report: GradeReport) -> Grading {
    match report {
        GradeReport::Correct => Grading::Correct,
        GradeReport::Incorrect { question, answer } => Grading::Incorrect(Correction {
            prior_prompt: question,
            correct_value: clean_correct_value(answer),
        }),
        GradeReport::Unavailable => Grading::Unavailable,
    }
}

/// The study site, seen through one tab's DevTools session.
pub struct SmartbookPage {
    cdp: CdpPage,
}

impl SmartbookPage {
    pub fn new(cdp: CdpPage) -> Self {
        Self { cdp }
    }

    async fn click(&self, selector: &str) -> Result<bool> {
        let outcome: ScriptOutcome = self.cdp.eval(&click_script(selector)).await?;
        Ok(outcome.success)
    }
}

#[async_trait]
impl SitePage for SmartbookPage {
    async fn probe_state(&self) -> Result<PageState> {
        let state: String = self.cdp.eval(PROBE_SCRIPT).await?;
        match state.as_str() {
            "overview" => Ok(PageState::Overview),
            "forced_reading" => Ok(PageState::ForcedReading),
            "question" => Ok(PageState::Question),
            "idle" => Ok(PageState::Idle),
            other => bail!("unrecognized page state: {other}"),
        }
    }

    async fn parse_task(&self) -> Result<Option<Task>> {
        self.cdp.eval(PARSE_SCRIPT).await
    }

    async fn apply_answer(&self, reply: &OracleReply) -> Result<ApplyOutcome> {
        let report: ApplyReport = self.cdp.eval(&apply_script(&reply.answer)).await?;
        match report {
            ApplyReport::Missing => bail!("question container disappeared before the answer landed"),
            ApplyReport::Announced => Ok(ApplyOutcome {
                applied: true,
                gradable: false,
            }),
            ApplyReport::Filled { touched } | ApplyReport::Clicked { touched } => {
                if touched == 0 {
                    debug!("no page control matched the answer");
                }
                Ok(ApplyOutcome {
                    applied: touched > 0,
                    gradable: true,
                })
            }
        }
    }

    async fn confirm_confidence(&self) -> Result<()> {
        let ready = self
            .cdp
            .wait_for(&exists_script(CONFIDENCE_READY), BOUNDED_WAIT)
            .await?;
        if !ready {
            bail!("confidence control did not enable within {BOUNDED_WAIT:?}");
        }
        if !self.click(CONFIDENCE_READY).await? {
            bail!("confidence control vanished before the click");
        }
        Ok(())
    }

    async fn grade(&self) -> Result<Grading> {
        let report: GradeReport = self.cdp.eval(GRADE_SCRIPT).await?;
        Ok(grading_from(report))
    }

    async fn advance(&self) -> Result<()> {
        let present = self
            .cdp
            .wait_for(&exists_script(NEXT_BUTTON), BOUNDED_WAIT)
            .await?;
        if !present {
            bail!("next control did not appear within {BOUNDED_WAIT:?}");
        }
        if !self.click(NEXT_BUTTON).await? {
            bail!("next control vanished before the click");
        }
        Ok(())
    }

    async fn click_continue(&self) -> Result<bool> {
        let outcome: ScriptOutcome = self.cdp.eval(CONTINUE_SCRIPT).await?;
        Ok(outcome.success)
    }

    async fn complete_forced_reading(&self) -> Result<()> {
        if !self.click(READ_BUTTON).await? {
            bail!("reading tray control not found");
        }
        if !self
            .cdp
            .wait_for(&exists_script(TO_QUESTIONS_BUTTON), BOUNDED_WAIT)
            .await?
        {
            bail!("reading view did not expose its questions control");
        }
        if !self.click(TO_QUESTIONS_BUTTON).await? {
            bail!("questions control vanished before the click");
        }
        if !self
            .cdp
            .wait_for(&exists_script(NEXT_BUTTON), BOUNDED_WAIT)
            .await?
        {
            bail!("next control did not appear after the reading view");
        }
        if !self.click(NEXT_BUTTON).await? {
            bail!("next control vanished before the click");
        }
        Ok(())
    }

    async fn alert(&self, message: &str) -> Result<()> {
        self.cdp.run(&js::alert(message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_value_strips_field_prefix() {
        assert_eq!(clean_one("Field 1: mitochondria"), "mitochondria");
        assert_eq!(clean_one("Field 12:  osmosis "), "osmosis");
    }

    #[test]
    fn test_clean_value_takes_first_alternative() {
        assert_eq!(clean_one("H2O or water"), "H2O");
        assert_eq!(clean_one("Field 2: glucose or dextrose"), "glucose");
    }

    #[test]
    fn test_clean_value_passes_plain_text() {
        assert_eq!(clean_one("the mitochondria"), "the mitochondria");
        // "or" must stand alone to count as an alternative.
        assert_eq!(clean_one("corridor"), "corridor");
    }

    #[test]
    fn test_clean_value_maps_over_many() {
        let cleaned = clean_correct_value(AnswerValue::Many(vec![
            "Field 1: a".into(),
            "b or c".into(),
        ]));
        assert_eq!(
            cleaned,
            AnswerValue::Many(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_grading_from_cleans_the_correction() {
        let report: GradeReport = serde_json::from_value(json!({
            "verdict": "incorrect",
            "question": "Water is H2[BLANK]",
            "answer": "Field 1: O or oxygen",
        }))
        .unwrap();
        match grading_from(report) {
            Grading::Incorrect(correction) => {
                assert_eq!(correction.prior_prompt, "Water is H2[BLANK]");
                assert_eq!(correction.correct_value, AnswerValue::One("O".into()));
            }
            other => panic!("expected incorrect grading, got {other:?}"),
        }
    }

    #[test]
    fn test_grade_report_wire_shapes() {
        let correct: GradeReport = serde_json::from_value(json!({"verdict": "correct"})).unwrap();
        assert!(matches!(correct, GradeReport::Correct));

        let many: GradeReport = serde_json::from_value(json!({
            "verdict": "incorrect",
            "question": "Pick two",
            "answer": ["a", "b"],
        }))
        .unwrap();
        match many {
            GradeReport::Incorrect { answer, .. } => assert_eq!(answer.len(), 2),
            other => panic!("expected incorrect report, got {other:?}"),
        }

        let unavailable: GradeReport =
            serde_json::from_value(json!({"verdict": "unavailable"})).unwrap();
        assert!(matches!(unavailable, GradeReport::Unavailable));
    }

    #[test]
    fn test_apply_report_wire_shapes() {
        let filled: ApplyReport =
            serde_json::from_value(json!({"mode": "filled", "touched": 2})).unwrap();
        assert!(matches!(filled, ApplyReport::Filled { touched: 2 }));

        let announced: ApplyReport = serde_json::from_value(json!({"mode": "announced"})).unwrap();
        assert!(matches!(announced, ApplyReport::Announced));
    }

    #[test]
    fn test_apply_script_escapes_answers() {
        let answer = AnswerValue::One("it's \"quoted\"".into());
        let script = apply_script(&answer);
        assert!(script.contains(r#"['it\'s \"quoted\"']"#));
        assert!(script.contains("fitb-input"));
        assert!(script.contains("awd-probe-type-matching"));
    }

    #[test]
    fn test_probe_script_orders_interstitials_first() {
        let overview_at = PROBE_SCRIPT.find("awd-topic-overview-button-bar").unwrap();
        let forced_at = PROBE_SCRIPT.find("forced-learning").unwrap();
        let question_at = PROBE_SCRIPT.find("probe-container").unwrap();
        assert!(overview_at < forced_at && forced_at < question_at);
    }
}
