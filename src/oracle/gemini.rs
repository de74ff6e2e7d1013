//! Gemini adapter.
//!
//! The composer is a Quill contenteditable and replies render inside
//! `model-response` elements. Change events from those custom elements are
//! patchy, so this variant keeps the polling fallback on.

use super::{OracleKind, OraclePage, TYPE_SETTLE};
use crate::cdp::{js, CdpPage};
use crate::extract::OutputSnapshot;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

const COUNT_SCRIPT: &str = "document.querySelectorAll('model-response').length";

const SEND_SCRIPT: &str = r#"(() => {
    const selectors = [
        'button[aria-label="Send message"]',
        '[aria-label="Send message"]',
        'button.send-button',
    ];
    for (const selector of selectors) {
        const button = document.querySelector(selector);
        if (button && !button.disabled) {
            button.click();
            return { success: true };
        }
    }
    return { success: false };
})()"#;

fn type_script(prompt: &str) -> String {
    format!(
        r#"(() => {{
            const editor = document.querySelector('.ql-editor[contenteditable="true"]');
            if (!editor) return {{ success: false }};
            editor.focus();
            editor.innerHTML = '<p>{}</p>';
            editor.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return {{ success: true }};
        }})()"#,
        js::js_string(prompt)
    )
}

fn snapshots_script(baseline: usize) -> String {
    format!(
        r#"(() => {{
            const messages = Array.from(document.querySelectorAll('model-response'));
            return messages.slice({baseline}).map((message) => ({{
                blocks: Array.from(message.querySelectorAll('pre code')).map((block) => ({{
                    info: block.className || null,
                    text: block.textContent,
                }})),
                text: message.textContent || '',
                streaming: !!message.querySelector('.loading-animation'),
            }}));
        }})()"#
    )
}

#[derive(Debug, Deserialize)]
struct StepReport {
    success: bool,
}

pub struct GeminiPage {
    cdp: CdpPage,
}

impl GeminiPage {
    pub fn new(cdp: CdpPage) -> Self {
        Self { cdp }
    }
}

#[async_trait]
impl OraclePage for GeminiPage {
    fn kind(&self) -> OracleKind {
        OracleKind::Gemini
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
    fn test_type_script_targets_quill_editor() {
        let script = type_script("plain question");
        assert!(script.contains(r#".ql-editor[contenteditable="true"]"#));
        assert!(script.contains("<p>plain question</p>"));
    }
}
