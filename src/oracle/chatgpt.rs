//! ChatGPT adapter.
//!
//! The composer is a contenteditable fed through `innerHTML`, assistant
//! replies carry a `data-message-author-role` attribute, and a streaming
//! reply is marked with `.result-streaming`. Reply DOM changes are reliable
//! here, so this variant runs mutation-driven detection without the polling
//! fallback.

use super::{OracleKind, OraclePage, TYPE_SETTLE};
use crate::cdp::{js, CdpPage};
use crate::extract::OutputSnapshot;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

const OUTPUT_SELECTOR: &str = r#"[data-message-author-role="assistant"]"#;

const COUNT_SCRIPT: &str =
    r#"document.querySelectorAll('[data-message-author-role="assistant"]').length"#;

const SEND_SCRIPT: &str = r#"(() => {
    const sendButton = document.querySelector('[data-testid="send-button"]');
    if (!sendButton || sendButton.disabled) return { success: false };
    sendButton.click();
    return { success: true };
})()"#;

fn type_script(prompt: &str) -> String {
    format!(
        r#"(() => {{
            const inputArea = document.getElementById('prompt-textarea');
            if (!inputArea) return {{ success: false }};
            inputArea.focus();
            inputArea.innerHTML = '<p>{}</p>';
            inputArea.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return {{ success: true }};
        }})()"#,
        js::js_string(prompt)
    )
}

fn snapshots_script(baseline: usize) -> String {
    format!(
        r#"(() => {{
            const messages = Array.from(document.querySelectorAll('{selector}'));
            return messages.slice({baseline}).map((message) => ({{
                blocks: Array.from(message.querySelectorAll('pre code')).map((block) => ({{
                    info: block.className || null,
                    text: block.textContent,
                }})),
                text: message.textContent || '',
                streaming: !!message.querySelector('.result-streaming'),
            }}));
        }})()"#,
        selector = js::js_string(OUTPUT_SELECTOR),
        baseline = baseline,
    )
}

#[derive(Debug, Deserialize)]
struct StepReport {
    success: bool,
}

pub struct ChatGptPage {
    cdp: CdpPage,
}

impl ChatGptPage {
    pub fn new(cdp: CdpPage) -> Self {
        Self { cdp }
    }
}

#[async_trait]
impl OraclePage for ChatGptPage {
    fn kind(&self) -> OracleKind {
        OracleKind::ChatGpt
    }

    async fn submit_prompt(&self, prompt: &str) -> Result<()> {
        self.cdp.ensure_observer().await?;
        tokio::time::sleep(TYPE_SETTLE).await;
        let typed: StepReport = self.cdp.eval(&type_script(prompt)).await?;
        if !typed.success {
            bail!("prompt input not found");
        }
        tokio::time::sleep(TYPE_SETTLE).await;
        let sent: StepReport = self.cdp.eval(SEND_SCRIPT).await?;
        if !sent.success {
            bail!("send control not found");
        }
        Ok(())
    }

    async fn output_count(&self) -> Result<usize> {
        self.cdp.eval(COUNT_SCRIPT).await
    }

    async fn outputs_after(&self, baseline: usize) -> Result<Vec<OutputSnapshot>> {
        self.cdp.eval(&snapshots_script(baseline)).await
    }

    fn mutations(&self) -> broadcast::Receiver<()> {
        self.cdp.mutations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_script_escapes_prompt() {
        let script = type_script("What is \"2 + 2\"?\nPick one.");
        assert!(script.contains(r#"<p>What is \"2 + 2\"?\nPick one.</p>"#));
        assert!(script.contains("prompt-textarea"));
    }

    #[test]
    fn test_snapshot_script_slices_past_baseline() {
        let script = snapshots_script(3);
        assert!(script.contains(".slice(3)"));
        assert!(script.contains("result-streaming"));
    }
}
