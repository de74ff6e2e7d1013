//! Oracle side: the AI chat tabs that answer questions.
//!
//! [`OracleKind`] names the supported variants, [`OraclePage`] is the seam
//! between orchestration and page structure, and [`OracleRunner`] is the
//! per-tab agent task: it services the tab's mailbox, types submitted
//! questions into the page, and runs the reply watcher.

pub mod chatgpt;
pub mod deepseek;
pub mod gemini;

use crate::bus::Delivery;
use crate::events::{CourierEvent, EventBus};
use crate::extract::OutputSnapshot;
use crate::messages::{Ack, Envelope, Message};
use crate::prompt::format_prompt;
use crate::router::RouterHandle;
use crate::transport::{ContextInfo, UrlPattern};
use crate::watcher::{ResponseWatcher, WatchConfig, WatchOutcome};
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause before typing into a chat input and again before clicking send.
pub(crate) const TYPE_SETTLE: Duration = Duration::from_millis(300);

/// The AI chat variants this runtime can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    #[default]
    ChatGpt,
    Gemini,
    Deepseek,
}

impl OracleKind {
    pub fn all() -> [OracleKind; 3] {
        [OracleKind::ChatGpt, OracleKind::Gemini, OracleKind::Deepseek]
    }

    /// Config/wire identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            OracleKind::ChatGpt => "chatgpt",
            OracleKind::Gemini => "gemini",
            OracleKind::Deepseek => "deepseek",
        }
    }

    /// Name shown to users in alerts and status output.
    pub fn display_name(&self) -> &'static str {
        match self {
            OracleKind::ChatGpt => "ChatGPT",
            OracleKind::Gemini => "Gemini",
            OracleKind::Deepseek => "DeepSeek",
        }
    }

    /// Tab URL pattern this variant is served from.
    pub fn url_pattern(&self) -> UrlPattern {
        match self {
            OracleKind::ChatGpt => UrlPattern::new("https://chatgpt.com/*"),
            OracleKind::Gemini => UrlPattern::new("https://gemini.google.com/*"),
            OracleKind::Deepseek => UrlPattern::new("https://chat.deepseek.com/*"),
        }
    }

    /// Watch tuning per variant. ChatGPT's DOM emits reliable change events;
    /// the others get the polling safety net on top.
    pub fn watch_config(&self) -> WatchConfig {
        match self {
            OracleKind::ChatGpt => WatchConfig::event_driven(),
            OracleKind::Gemini | OracleKind::Deepseek => WatchConfig::with_polling(),
        }
    }

    /// Parse a config/CLI identifier.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "chatgpt" => Ok(OracleKind::ChatGpt),
            "gemini" => Ok(OracleKind::Gemini),
            "deepseek" => Ok(OracleKind::Deepseek),
            _ => bail!("unknown oracle kind: {s} (expected chatgpt, gemini, or deepseek)"),
        }
    }
}

impl std::fmt::Display for OracleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestration core needs from an oracle tab.
///
/// Implementations own all page structure knowledge: selectors, typing
/// mechanics, which DOM elements count as output. Methods are snapshots of
/// the live page, so errors mean "could not read the page right now" and
/// callers treat them as "nothing yet".
#[async_trait]
pub trait OraclePage: Send + Sync {
    fn kind(&self) -> OracleKind;

    /// Type the prompt into the page and send it.
    async fn submit_prompt(&self, prompt: &str) -> Result<()>;

    /// How many reply elements the page currently shows.
    async fn output_count(&self) -> Result<usize>;

    /// Extraction-ready snapshots of reply elements beyond `baseline`,
    /// oldest first.
    async fn outputs_after(&self, baseline: usize) -> Result<Vec<OutputSnapshot>>;

    /// DOM change signals for the page. Coalesced; a signal means "look
    /// again", nothing more.
    fn mutations(&self) -> broadcast::Receiver<()>;
}

/// Per-tab agent for an oracle page.
pub struct OracleRunner {
    context: ContextInfo,
    page: Arc<dyn OraclePage>,
    watcher: Arc<ResponseWatcher>,
    router: RouterHandle,
    events: Arc<EventBus>,
    deliveries: mpsc::Receiver<Delivery>,
}

impl OracleRunner {
    pub fn new(
        context: ContextInfo,
        page: Arc<dyn OraclePage>,
        router: RouterHandle,
        events: Arc<EventBus>,
        deliveries: mpsc::Receiver<Delivery>,
    ) -> Self {
        let watcher = Arc::new(ResponseWatcher::new(page.kind().watch_config()));
        Self {
            context,
            page,
            watcher,
            router,
            events,
            deliveries,
        }
    }

    /// Service the mailbox and watch rounds until cancelled or detached.
    pub async fn run(mut self, cancel: CancellationToken) {
        let kind = self.page.kind();
        let mut pending: Option<oneshot::Receiver<WatchOutcome>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => self.handle_delivery(delivery, &mut pending).await,
                    None => break,
                },
                outcome = pending_outcome(&mut pending), if pending.is_some() => {
                    pending = None;
                    match outcome {
                        Ok(WatchOutcome::Resolved { payload, via, elapsed }) => {
                            let elapsed_ms = elapsed.as_millis() as u64;
                            info!(oracle = %kind, ?via, elapsed_ms, "reply detected");
                            self.events.emit(CourierEvent::WatchResolved {
                                oracle: kind,
                                via,
                                elapsed_ms,
                            });
                            self.router
                                .submit(Envelope::from_context(
                                    self.context.clone(),
                                    Message::oracle_response(kind, payload),
                                ))
                                .await;
                        }
                        Ok(WatchOutcome::TimedOut { waited }) => {
                            let waited_ms = waited.as_millis() as u64;
                            warn!(oracle = %kind, waited_ms, "no reply before deadline");
                            self.events.emit(CourierEvent::WatchTimedOut {
                                oracle: kind,
                                waited_ms,
                            });
                        }
                        // Round was externally reset; nothing to report.
                        Err(_) => {}
                    }
                }
            }
        }

        self.watcher.reset();
        debug!(context = %self.context.id, oracle = %kind, "oracle agent stopped");
    }

    async fn handle_delivery(
        &mut self,
        delivery: Delivery,
        pending: &mut Option<oneshot::Receiver<WatchOutcome>>,
    ) {
        match &delivery.envelope.message {
            Message::ReceiveQuestion { question } => {
                let question = question.clone();

                // A new question always starts a clean round, whatever the
                // previous one was doing.
                self.watcher.reset();
                *pending = None;

                let baseline = match self.page.output_count().await {
                    Ok(count) => count,
                    Err(err) => {
                        warn!("could not read output baseline, assuming empty: {err:#}");
                        0
                    }
                };

                let prompt = format_prompt(&question);
                match self.page.submit_prompt(&prompt).await {
                    Ok(()) => {
                        debug!(kind = ?question.kind, baseline, "question submitted, watching for reply");
                        delivery.acknowledge(Ack::processing());
                        *pending = Some(self.watcher.arm(Arc::clone(&self.page), baseline));
                    }
                    Err(err) => {
                        warn!("prompt submission failed: {err:#}");
                        delivery.acknowledge(Ack::rejected(format!("{err:#}")));
                    }
                }
            }
            other => {
                let name = other.wire_name();
                delivery.acknowledge(Ack::rejected(format!("not handled by oracle agent: {name}")));
            }
        }
    }
}

/// Await the pending watch outcome; pend forever when there is none so the
/// select arm stays quiet.
async fn pending_outcome(
    pending: &mut Option<oneshot::Receiver<WatchOutcome>>,
) -> Result<WatchOutcome, oneshot::error::RecvError> {
    match pending {
        Some(rx) => rx.await,
        None => std::future::pending().await,
    }
}
