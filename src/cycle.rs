//! The automation cycle on the study page.
//!
//! One driving loop per study tab: classify what the page shows, click
//! through overview and required-reading screens, and for questions run the
//! full round — read, relay, await the reply, apply, confirm, grade, advance.
//! Stopping is cooperative: the switch is consulted between steps, never
//! mid-step, so a stop request takes effect within one settle delay.

use crate::events::{CourierEvent, EventBus};
use crate::extract::parse_reply;
use crate::messages::{Envelope, Message};
use crate::router::RouterHandle;
use crate::site::{PageState, SitePage};
use crate::task::{Correction, Grading};
use crate::transport::ContextInfo;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between cycle steps so the page can settle.
pub const CYCLE_SETTLE: Duration = Duration::from_millis(1000);

/// How often the loop re-checks the switch while paused or waiting.
const SWITCH_POLL: Duration = Duration::from_millis(200);

/// Pause after the confidence click before reading the grading verdict.
const GRADING_SETTLE: Duration = Duration::from_millis(1000);

/// Cooperative on/off switch for the automation loop. Cheap to clone and
/// share; the control surface flips it, the cycle obeys it.
#[derive(Debug, Clone, Default)]
pub struct AutomationSwitch {
    on: Arc<AtomicBool>,
}

impl AutomationSwitch {
    pub fn new(on: bool) -> Self {
        Self {
            on: Arc::new(AtomicBool::new(on)),
        }
    }

    pub fn set(&self, on: bool) {
        self.on.store(on, Ordering::Release);
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }
}

/// Drives the question rounds on one study tab.
pub struct CycleController {
    page: Arc<dyn SitePage>,
    router: RouterHandle,
    origin: ContextInfo,
    switch: AutomationSwitch,
    events: Arc<EventBus>,
    /// Reply payloads forwarded by the tab's site agent.
    replies: mpsc::Receiver<String>,
    /// Held grading feedback, attached to exactly one later task.
    correction: Option<Correction>,
}

impl CycleController {
    pub fn new(
        page: Arc<dyn SitePage>,
        router: RouterHandle,
        origin: ContextInfo,
        switch: AutomationSwitch,
        events: Arc<EventBus>,
        replies: mpsc::Receiver<String>,
    ) -> Self {
        Self {
            page,
            router,
            origin,
            switch,
            events,
            replies,
            correction: None,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if !self.switch.is_on() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(SWITCH_POLL) => continue,
                }
            }
            self.step(&cancel).await;
        }
        debug!(context = %self.origin.id, "automation cycle stopped");
    }

    async fn step(&mut self, cancel: &CancellationToken) {
        let state = match self.page.probe_state().await {
            Ok(state) => state,
            Err(err) => {
                warn!("could not probe page state: {err:#}");
                sleep(CYCLE_SETTLE).await;
                return;
            }
        };

        match state {
            PageState::Overview => {
                match self.page.click_continue().await {
                    Ok(true) => debug!("left the overview screen"),
                    Ok(false) => debug!("overview continue control not found"),
                    Err(err) => warn!("overview continue failed: {err:#}"),
                }
                sleep(CYCLE_SETTLE).await;
            }
            PageState::ForcedReading => {
                if let Err(err) = self.page.complete_forced_reading().await {
                    self.disable(format!("required reading flow failed: {err:#}"));
                }
                sleep(CYCLE_SETTLE).await;
            }
            PageState::Question => self.question_round(cancel).await,
            PageState::Idle => sleep(CYCLE_SETTLE).await,
        }
    }

    /// One full question round. Any early return goes back to the main loop,
    /// which re-probes the page from scratch.
    async fn question_round(&mut self, cancel: &CancellationToken) {
        let mut task = match self.page.parse_task().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                sleep(CYCLE_SETTLE).await;
                return;
            }
            Err(err) => {
                self.disable(format!("question could not be read: {err:#}"));
                return;
            }
        };

        // The held correction rides along exactly once.
        task.correction = self.correction.take();
        let corrected = task.correction.is_some();
        let kind = task.kind;

        // A reply from an abandoned round must not answer this question.
        while self.replies.try_recv().is_ok() {}

        info!(?kind, corrected, "submitting question");
        self.events.emit(CourierEvent::TaskSubmitted { kind, corrected });
        self.router
            .submit(Envelope::from_context(
                self.origin.clone(),
                Message::SendQuestion { question: task },
            ))
            .await;

        let Some(payload) = self.await_reply(cancel).await else {
            return;
        };

        // The page may have moved on while we waited; if so the reply is
        // stale and the main loop deals with whatever is showing now.
        match self.page.probe_state().await {
            Ok(PageState::Question) => {}
            Ok(state) => {
                debug!(?state, "page moved on while awaiting reply, dropping it");
                return;
            }
            Err(err) => {
                warn!("could not re-probe page state: {err:#}");
                return;
            }
        }

        let Some(reply) = parse_reply(&payload) else {
            warn!("relayed reply was not usable, retrying the round");
            sleep(CYCLE_SETTLE).await;
            return;
        };

        let outcome = match self.page.apply_answer(&reply).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.disable(format!("answer could not be applied: {err:#}"));
                return;
            }
        };
        self.events.emit(CourierEvent::AnswerApplied {
            kind,
            gradable: outcome.gradable,
        });

        if !self.switch.is_on() {
            return;
        }

        // Match-pairs keeps the confidence control disabled until the user
        // enters the matches, so this is also where that kind hands control
        // back to the user.
        if let Err(err) = self.page.confirm_confidence().await {
            self.disable(format!("confidence control not available: {err:#}"));
            return;
        }

        sleep(GRADING_SETTLE).await;

        if outcome.gradable {
            match self.page.grade().await {
                Ok(Grading::Correct) => {
                    debug!("answer graded correct");
                    self.events.emit(CourierEvent::GradedCorrect);
                }
                Ok(Grading::Incorrect(correction)) => {
                    info!(prior = %correction.prior_prompt, "answer graded incorrect, keeping the correction");
                    self.events.emit(CourierEvent::GradedIncorrect {
                        prior_prompt: correction.prior_prompt.clone(),
                    });
                    self.correction = Some(correction);
                }
                Ok(Grading::Unavailable) => {
                    debug!("grading verdict not readable");
                }
                Err(err) => {
                    warn!("grading extraction failed: {err:#}");
                }
            }
        }

        if let Err(err) = self.page.advance().await {
            self.disable(format!("could not advance to the next question: {err:#}"));
            return;
        }
        sleep(CYCLE_SETTLE).await;
    }

    /// Wait for a relayed reply. Returns `None` when cancelled or switched
    /// off; no reply is ever synthesized, so a watch timeout upstream keeps
    /// this waiting until the user intervenes.
    async fn await_reply(&mut self, cancel: &CancellationToken) -> Option<String> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = sleep(SWITCH_POLL) => {
                    if !self.switch.is_on() {
                        debug!("automation switched off while awaiting reply");
                        return None;
                    }
                }
                payload = self.replies.recv() => return payload,
            }
        }
    }

    fn disable(&self, reason: String) {
        warn!(%reason, "automation disabled");
        self.switch.set(false);
        self.events.emit(CourierEvent::AutomationChanged { on: false, reason });
    }
}
