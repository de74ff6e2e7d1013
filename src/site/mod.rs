//! Study-site side: the tab where questions appear and answers land.
//!
//! [`SitePage`] is the seam between the automation cycle and page structure,
//! mirroring [`crate::oracle::OraclePage`] on the other side of the bus.
//! [`SiteRunner`] is the tab's agent task: it services the mailbox, surfaces
//! alerts, and feeds relayed reply payloads to the cycle controller.

pub mod smartbook;

use crate::bus::Delivery;
use crate::messages::{Ack, Message};
use crate::task::{ApplyOutcome, Grading, OracleReply, Task};
use crate::transport::{ContextInfo, UrlPattern};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tab URL pattern for the study site.
pub const SITE_URL: &str = "https://learning.mheducation.com/*";

pub fn url_pattern() -> UrlPattern {
    UrlPattern::new(SITE_URL)
}

/// What the page is currently showing, probed overview-first so a reading
/// screen with a leftover question container is not misread as a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Topic overview with a continue control.
    Overview,
    /// Required-reading interstitial blocking the next question.
    ForcedReading,
    /// A question is on screen.
    Question,
    /// Nothing actionable.
    Idle,
}

/// What the automation cycle needs from the study page.
///
/// All DOM knowledge lives behind this seam. Errors out of the mutating
/// operations mean the page did not look the way it should, which the cycle
/// treats as a reason to stop driving rather than spin.
#[async_trait]
pub trait SitePage: Send + Sync {
    /// Classify what is on screen right now.
    async fn probe_state(&self) -> Result<PageState>;

    /// Read the current question. `Ok(None)` when the container is there
    /// but not (yet) readable as a question.
    async fn parse_task(&self) -> Result<Option<Task>>;

    /// Fill the answer into the page.
    async fn apply_answer(&self, reply: &OracleReply) -> Result<ApplyOutcome>;

    /// Wait for the confidence control to enable, then click it.
    async fn confirm_confidence(&self) -> Result<()>;

    /// Read the grading verdict for the just-submitted answer.
    async fn grade(&self) -> Result<Grading>;

    /// Click through to the next question.
    async fn advance(&self) -> Result<()>;

    /// Click the overview continue control. False when it is not there.
    async fn click_continue(&self) -> Result<bool>;

    /// Click through a required-reading interstitial.
    async fn complete_forced_reading(&self) -> Result<()>;

    /// Surface a user-visible alert on the page.
    async fn alert(&self, message: &str) -> Result<()>;
}

/// Per-tab agent for the study page.
pub struct SiteRunner {
    context: ContextInfo,
    page: Arc<dyn SitePage>,
    deliveries: mpsc::Receiver<Delivery>,
    /// Reply payloads handed onward to the cycle controller.
    replies: mpsc::Sender<String>,
}

impl SiteRunner {
    pub fn new(
        context: ContextInfo,
        page: Arc<dyn SitePage>,
        deliveries: mpsc::Receiver<Delivery>,
        replies: mpsc::Sender<String>,
    ) -> Self {
        Self {
            context,
            page,
            deliveries,
            replies,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                delivery = self.deliveries.recv() => match delivery {
                    Some(delivery) => self.handle_delivery(delivery).await,
                    None => break,
                },
            }
        }
        debug!(context = %self.context.id, "site agent stopped");
    }

    async fn handle_delivery(&mut self, delivery: Delivery) {
        match &delivery.envelope.message {
            Message::ProcessResponse { response } => {
                let payload = response.clone();
                let age_ms = (chrono::Utc::now() - delivery.envelope.sent_at).num_milliseconds();
                debug!(context = %self.context.id, age_ms, "reply payload arrived");
                // Ack first: receipt is not contingent on what the cycle
                // does with the payload.
                delivery.acknowledge(Ack::ok());
                if self.replies.send(payload).await.is_err() {
                    warn!("automation cycle is gone, dropping relayed reply");
                }
            }
            Message::Alert { message } => {
                let message = message.clone();
                delivery.acknowledge(Ack::ok());
                if let Err(err) = self.page.alert(&message).await {
                    warn!("could not surface alert on page: {err:#}");
                }
            }
            other => {
                let name = other.wire_name();
                delivery.acknowledge(Ack::rejected(format!("not handled by site agent: {name}")));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::messages::Envelope;
    use crate::transport::{ContextId, WindowId};
    use std::sync::Mutex;

    struct RecordingPage {
        alerts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SitePage for RecordingPage {
        async fn probe_state(&self) -> Result<PageState> {
            Ok(PageState::Idle)
        }
        async fn parse_task(&self) -> Result<Option<Task>> {
            Ok(None)
        }
        async fn apply_answer(&self, _reply: &OracleReply) -> Result<ApplyOutcome> {
            Ok(ApplyOutcome {
                applied: false,
                gradable: false,
            })
        }
        async fn confirm_confidence(&self) -> Result<()> {
            Ok(())
        }
        async fn grade(&self) -> Result<Grading> {
            Ok(Grading::Unavailable)
        }
        async fn advance(&self) -> Result<()> {
            Ok(())
        }
        async fn click_continue(&self) -> Result<bool> {
            Ok(false)
        }
        async fn complete_forced_reading(&self) -> Result<()> {
            Ok(())
        }
        async fn alert(&self, message: &str) -> Result<()> {
            self.alerts.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runner_relays_payloads_and_alerts() {
        let bus = Bus::new();
        let ctx = ContextId(1);
        let info = ContextInfo::new(ctx, WindowId(1), "https://learning.mheducation.com/x");
        let mailbox = bus.attach(ctx);
        let (reply_tx, mut reply_rx) = mpsc::channel(4);
        let page = Arc::new(RecordingPage {
            alerts: Mutex::new(Vec::new()),
        });

        let cancel = CancellationToken::new();
        let runner = SiteRunner::new(info, page.clone(), mailbox, reply_tx);
        let task = tokio::spawn(runner.run(cancel.clone()));

        let ack = bus
            .send_once(
                ctx,
                Envelope::from_router(Message::ProcessResponse {
                    response: r#"{"answer": "4"}"#.into(),
                }),
            )
            .await
            .unwrap();
        assert!(ack.received);
        assert_eq!(reply_rx.recv().await.unwrap(), r#"{"answer": "4"}"#);

        let ack = bus
            .send_once(
                ctx,
                Envelope::from_router(Message::Alert {
                    message: "check the other tab".into(),
                }),
            )
            .await
            .unwrap();
        assert!(ack.received);
        assert_eq!(
            page.alerts.lock().unwrap().as_slice(),
            ["check the other tab"]
        );

        // Oracle-bound traffic is not the site agent's business.
        let ack = bus
            .send_once(
                ctx,
                Envelope::from_router(Message::OpenSettings),
            )
            .await
            .unwrap();
        assert!(!ack.received);

        cancel.cancel();
        task.await.unwrap();
    }
}
