//! DeepSeek adapter.
//!
//! The page churns its class names between releases, so element lookup runs
//! down selector ladders: first selector that matches anything wins, and
//! unparseable selectors (`:has` on older engines) are skipped. DOM change
//! events are not dependable here, so this variant keeps the polling
//! fallback on.

use super::{OracleKind, OraclePage, TYPE_SETTLE};
use crate::cdp::{js, CdpPage};
use crate::extract::OutputSnapshot;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::broadcast;

const COUNT_SCRIPT: &str = r#"(() => {
    const selectors = [
        "[data-testid='chat-message-assistant']",
        'model-response',
        '.ds-markdown',
        '.f9bf7997',
    ];
    for (const selector of selectors) {
        const found = document.querySelectorAll(selector);
        if (found.length > 0) return found.length;
    }
    return 0;
})()"#;

const SEND_SCRIPT: &str = r#"(() => {
    const selectors = [
        '[role="button"].f6d670',
        '.f6d670',
        '[role="button"]:has(svg path[d^="M7 16c"])',
        'button[type="submit"]',
        '[aria-label="Send message"]',
        '.bf38813a button',
        'button:has(svg)',
        '[data-testid="send-button"]',
    ];
    for (const selector of selectors) {
        let button = null;
        try {
            button = document.querySelector(selector);
        } catch (e) {
            continue;
        }
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
            const chatInput = document.getElementById('chat-input');
            if (!chatInput) return {{ success: false }};
            chatInput.focus();
            chatInput.value = '{}';
            chatInput.dispatchEvent(new Event('input', {{ bubbles: true }}));
            return {{ success: true }};
        }})()"#,
        js::js_string(prompt)
    )
}

fn snapshots_script(baseline: usize) -> String {
    format!(
        r#"(() => {{
            const selectors = [
                "[data-testid='chat-message-assistant']",
                'model-response',
                '.ds-markdown',
                '.f9bf7997',
            ];
            let messages = [];
            for (const selector of selectors) {{
                const found = document.querySelectorAll(selector);
                if (found.length > 0) {{
                    messages = Array.from(found);
                    break;
                }}
            }}
            return messages.slice({baseline}).map((message) => {{
                const blockSelectors = [
                    '.md-code-block pre',
                    'pre code',
                    'pre',
                    '.code-block pre',
                    '.ds-markdown pre',
                ];
                let found = [];
                for (const selector of blockSelectors) {{
                    const blocks = message.querySelectorAll(selector);
                    if (blocks.length > 0) {{
                        found = Array.from(blocks);
                        break;
                    }}
                }}
                const blocks = found.flatMap((block) => {{
                    const parent = block.closest('.md-code-block, .code-block, .ds-markdown');
                    if (!parent) return [];
                    const infoElements = parent.querySelectorAll(
                        '.d813de27, .md-code-block-infostring, [class*="json"], [class*="language"]'
                    );
                    const info = infoElements.length > 0
                        ? Array.from(infoElements).map((el) => el.textContent).join(' ')
                        : null;
                    return [{{ info: info, text: block.textContent }}];
                }});
                return {{
                    blocks: blocks,
                    text: message.textContent || '',
                    streaming: false,
                }};
            }});
        }})()"#
    )
}

#[derive(Debug, Deserialize)]
struct StepReport {
    success: bool,
}

pub struct DeepseekPage {
    cdp: CdpPage,
}

impl DeepseekPage {
    pub fn new(cdp: CdpPage) -> Self {
        Self { cdp }
    }
}

#[async_trait]
impl OraclePage for DeepseekPage {
    fn kind(&self) -> OracleKind {
        OracleKind::Deepseek
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
    fn test_send_ladder_prefers_specific_selectors() {
        let specific = SEND_SCRIPT.find(".f6d670").unwrap();
        let generic = SEND_SCRIPT.find("button:has(svg)").unwrap();
        assert!(specific < generic);
        assert!(SEND_SCRIPT.contains("button.disabled"));
    }

    #[test]
    fn test_type_script_escapes_prompt() {
        let script = type_script("Line one\nLine 'two'");
        assert!(script.contains(r"Line one\nLine \'two\'"));
        assert!(script.contains("chat-input"));
    }
}
