//! The session router: cross-tab identity and message relay.
//!
//! One router per runtime. It owns the [`Session`], watches tab lifecycle
//! events, and carries envelopes between the study tab and the active oracle
//! tab, with retried delivery, focus choreography, and user-visible alerts
//! when a relay cannot complete. Relays run on spawned tasks so the inbound
//! loop never blocks behind a retry window.

use crate::bus::Bus;
use crate::config::ConfigStore;
use crate::delivery::{deliver, RetryPolicy};
use crate::events::{CourierEvent, EventBus};
use crate::messages::{Envelope, Message};
use crate::oracle::OracleKind;
use crate::session::{RelayGuard, Session};
use crate::site;
use crate::task::Task;
use crate::transport::{ContextId, ContextInfo, TabEvent, Tabs, UrlPattern};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a focus change so the newly foregrounded page can resume its
/// timers before we talk to it.
pub const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Pause before giving focus back to the tab the user was on.
pub const FOCUS_RESTORE_DELAY: Duration = Duration::from_millis(1000);

const INBOUND_CAPACITY: usize = 32;

/// Cloneable submission side of the router's inbound queue.
#[derive(Debug, Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<Envelope>,
}

impl RouterHandle {
    pub(crate) fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Queue an envelope for routing. Submission is fire-and-forget; outcomes
    /// surface as events and deliveries, not return values.
    pub async fn submit(&self, envelope: Envelope) {
        let name = envelope.message.wire_name();
        if self.tx.send(envelope).await.is_err() {
            warn!(message = name, "router is gone, dropping envelope");
        }
    }
}

/// Routes envelopes between the study tab and the active oracle tab.
pub struct SessionRouter {
    session: Arc<Session>,
    tabs: Arc<dyn Tabs>,
    bus: Arc<Bus>,
    config: Arc<ConfigStore>,
    events: Arc<EventBus>,
    policy: RetryPolicy,
    site_pattern: UrlPattern,
}

impl SessionRouter {
    pub fn new(
        session: Arc<Session>,
        tabs: Arc<dyn Tabs>,
        bus: Arc<Bus>,
        config: Arc<ConfigStore>,
        events: Arc<EventBus>,
    ) -> (Arc<Self>, RouterHandle, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let router = Arc::new(Self {
            session,
            tabs,
            bus,
            config,
            events,
            policy: RetryPolicy::default(),
            site_pattern: site::url_pattern(),
        });
        (router, RouterHandle::new(tx), rx)
    }

    /// Drive the router until cancelled or the inbound queue closes.
    pub async fn run(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Envelope>,
        cancel: CancellationToken,
    ) {
        self.locate_contexts().await;
        let mut tab_events = self.tabs.subscribe();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
                event = tab_events.recv() => match event {
                    Ok(TabEvent::Activated(context)) => {
                        self.session.note_foreground(context);
                    }
                    Ok(TabEvent::Closed(context)) => {
                        if self.session.clear_context(context) {
                            info!(%context, "tab filling a session role closed");
                            self.events.emit(CourierEvent::ContextClosed { context });
                        }
                    }
                    Ok(TabEvent::Navigated { .. }) => {
                        // Identity refreshes on the next inbound message or
                        // locate; navigation alone changes nothing.
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "tab event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // We hold the Tabs impl alive through an Arc, so its
                        // sender side cannot drop while we run.
                        tab_events = self.tabs.subscribe();
                    }
                },
            }
        }
        debug!("router stopped");
    }

    async fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        let Envelope { origin, message, .. } = envelope;

        if let Some(origin) = &origin {
            self.capture_identity(origin);
        }

        if let Some((kind, payload)) = message.as_oracle_response() {
            debug!(oracle = %kind, bytes = payload.len(), "reply payload inbound");
            let router = Arc::clone(self);
            let payload = payload.to_string();
            tokio::spawn(async move { router.relay_reply(kind, payload).await });
            return;
        }

        match message {
            Message::SendQuestion { question } => match self.session.try_begin_relay() {
                Some(guard) => {
                    let router = Arc::clone(self);
                    tokio::spawn(async move { router.relay_task(question, origin, guard).await });
                }
                None => {
                    debug!("relay already in flight, dropping new question");
                    self.events.emit(CourierEvent::RelayDropped);
                }
            },
            Message::OpenSettings => {
                if let Some(origin) = &origin {
                    info!(context = %origin.id, "settings surface requested");
                    self.events
                        .emit(CourierEvent::SettingsRequested { context: origin.id });
                }
            }
            other => {
                debug!(message = other.wire_name(), "not addressed to the router, ignoring");
            }
        }
    }

    /// Relay a question from the study tab to the active oracle tab. Holds
    /// the relay guard for its whole extent, so the in-flight flag releases
    /// on every exit path.
    async fn relay_task(
        self: Arc<Self>,
        question: Task,
        origin: Option<ContextInfo>,
        guard: RelayGuard,
    ) {
        let _guard = guard;
        self.locate_contexts().await;
        let kind = self.session.oracle_kind();

        let Some(oracle) = self.session.oracle_slot() else {
            warn!(oracle = %kind, "no oracle tab open, asking the user for one");
            self.events.emit(CourierEvent::RelayFailed {
                oracle: kind,
                reason: "oracle tab not open".to_string(),
            });
            self.send_alert(
                origin.as_ref(),
                format!(
                    "Please open {} in another tab before using automation.",
                    kind.display_name()
                ),
            )
            .await;
            return;
        };

        // The asking tab becomes the study tab when none is known yet.
        if self.session.task_slot().is_none() {
            if let Some(origin) = &origin {
                self.session.set_task_slot(origin.id, origin.window);
            }
        }

        self.events.emit(CourierEvent::RelayStarted {
            oracle: kind,
            kind: question.kind,
        });

        // Captured before claiming focus. Focusing the oracle makes it the
        // foreground tab, which would otherwise become the tab we "restore".
        let restore_target = self.session.last_foreground();
        let same_window = self
            .session
            .task_slot()
            .is_some_and(|task| task.window == oracle.window);

        if same_window {
            if self.tabs.focus(oracle.context).await {
                self.events.emit(CourierEvent::FocusClaimed {
                    context: oracle.context,
                });
            }
            sleep(SETTLE_DELAY).await;
        }

        let envelope = Envelope::from_router(Message::ReceiveQuestion {
            question: question.clone(),
        });
        match deliver(&self.bus, oracle.context, envelope, self.policy).await {
            Ok(ack) if !ack.received => {
                let reason = ack
                    .detail
                    .unwrap_or_else(|| "question rejected by oracle tab".to_string());
                warn!(oracle = %kind, %reason, "oracle tab rejected the question");
                self.events.emit(CourierEvent::RelayFailed {
                    oracle: kind,
                    reason,
                });
                self.send_alert(origin.as_ref(), self.unreachable_oracle_text(kind))
                    .await;
            }
            Ok(_) => {
                info!(oracle = %kind, task = ?question.kind, "question relayed");
                self.events.emit(CourierEvent::TaskRelayed {
                    oracle: kind,
                    kind: question.kind,
                });
                if same_window {
                    self.schedule_focus_restore(restore_target, oracle.context);
                }
            }
            Err(err) => {
                warn!(oracle = %kind, "could not reach the oracle tab: {err}");
                self.events.emit(CourierEvent::RelayFailed {
                    oracle: kind,
                    reason: err.to_string(),
                });
                self.send_alert(origin.as_ref(), self.unreachable_oracle_text(kind))
                    .await;
            }
        }
    }

    /// Relay a detected oracle reply back to the study tab. Failures are
    /// logged, not surfaced; the oracle side has nothing further to do.
    async fn relay_reply(self: Arc<Self>, kind: OracleKind, payload: String) {
        if self.session.task_slot().is_none() {
            match self.tabs.query(&self.site_pattern).await.into_iter().next() {
                Some(info) => self.session.set_task_slot(info.id, info.window),
                None => {
                    debug!(oracle = %kind, "oracle replied but no study tab is open, dropping");
                    return;
                }
            }
        }

        self.locate_contexts().await;
        let Some(task) = self.session.task_slot() else {
            // Emptied by a concurrent close event.
            return;
        };

        let same_window = self
            .session
            .oracle_slot()
            .is_some_and(|oracle| oracle.window == task.window);

        if same_window {
            if self.tabs.focus(task.context).await {
                self.events.emit(CourierEvent::FocusClaimed {
                    context: task.context,
                });
            }
            sleep(SETTLE_DELAY).await;
        }

        let envelope = Envelope::from_router(Message::ProcessResponse { response: payload });
        match deliver(&self.bus, task.context, envelope, self.policy).await {
            Ok(ack) => {
                if !ack.received {
                    warn!(detail = ?ack.detail, "study tab rejected the relayed reply");
                }
                self.events.emit(CourierEvent::ReplyRelayed { oracle: kind });
            }
            Err(err) => {
                error!("could not hand the reply back to the study tab: {err}");
            }
        }
    }

    /// Give focus back to the prior foreground tab after a delay, unless
    /// that tab is the oracle itself.
    fn schedule_focus_restore(&self, target: Option<ContextId>, oracle: ContextId) {
        let Some(target) = target else { return };
        if target == oracle {
            return;
        }
        let tabs = Arc::clone(&self.tabs);
        let events = Arc::clone(&self.events);
        tokio::spawn(async move {
            sleep(FOCUS_RESTORE_DELAY).await;
            if tabs.focus(target).await {
                events.emit(CourierEvent::FocusRestored { context: target });
            }
        });
    }

    /// Best-effort user-visible alert: the asking tab first, the known study
    /// tab as fallback.
    async fn send_alert(&self, origin: Option<&ContextInfo>, text: String) {
        let target = origin
            .map(|o| o.id)
            .or_else(|| self.session.task_slot().map(|s| s.context));
        let Some(target) = target else {
            warn!(alert = %text, "no tab available to surface alert");
            return;
        };
        let envelope = Envelope::from_router(Message::Alert { message: text });
        if let Err(err) = deliver(&self.bus, target, envelope, self.policy).await {
            warn!("alert delivery failed: {err}");
        }
    }

    fn unreachable_oracle_text(&self, kind: OracleKind) -> String {
        format!(
            "Error communicating with {}. Please make sure it's open in another tab.",
            kind.display_name()
        )
    }

    /// Record the sender's role from its URL, whatever the message said.
    /// This keeps identity fresh without a heartbeat.
    fn capture_identity(&self, origin: &ContextInfo) {
        if self.site_pattern.matches(&origin.url) {
            self.session.set_task_slot(origin.id, origin.window);
            return;
        }
        for kind in OracleKind::all() {
            if kind.url_pattern().matches(&origin.url) {
                self.session.set_oracle_slot(kind, origin.id, origin.window);
                return;
            }
        }
    }

    /// Refresh role slots from live tab state. Never fails; a pattern with
    /// no match leaves the existing slot alone.
    async fn locate_contexts(&self) {
        if let Some(info) = self.tabs.query(&self.site_pattern).await.into_iter().next() {
            self.session.set_task_slot(info.id, info.window);
        }

        let kind = self.config.oracle_kind();
        self.session.set_oracle_kind(kind);
        if let Some(info) = self
            .tabs
            .query(&kind.url_pattern())
            .await
            .into_iter()
            .next()
        {
            self.session.set_oracle_slot(kind, info.id, info.window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Delivery;
    use crate::config::Config;
    use crate::messages::Ack;
    use crate::task::{OptionSet, TaskKind};
    use crate::transport::WindowId;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeTabs {
        tabs: Mutex<Vec<ContextInfo>>,
        focused: Mutex<Vec<ContextId>>,
        events: broadcast::Sender<TabEvent>,
    }

    impl FakeTabs {
        fn new(tabs: Vec<ContextInfo>) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                tabs: Mutex::new(tabs),
                focused: Mutex::new(Vec::new()),
                events,
            })
        }

        fn focus_history(&self) -> Vec<ContextId> {
            self.focused.lock().unwrap().clone()
        }

        fn activate(&self, context: ContextId) {
            let _ = self.events.send(TabEvent::Activated(context));
        }

        fn close(&self, context: ContextId) {
            self.tabs.lock().unwrap().retain(|t| t.id != context);
            let _ = self.events.send(TabEvent::Closed(context));
        }
    }

    #[async_trait::async_trait]
    impl Tabs for FakeTabs {
        async fn query(&self, pattern: &UrlPattern) -> Vec<ContextInfo> {
            self.tabs
                .lock()
                .unwrap()
                .iter()
                .filter(|t| pattern.matches(&t.url))
                .cloned()
                .collect()
        }

        async fn focus(&self, context: ContextId) -> bool {
            let known = self.tabs.lock().unwrap().iter().any(|t| t.id == context);
            if known {
                self.focused.lock().unwrap().push(context);
                self.activate(context);
            }
            known
        }

        fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
            self.events.subscribe()
        }
    }

    struct Harness {
        bus: Arc<Bus>,
        session: Arc<Session>,
        tabs: Arc<FakeTabs>,
        handle: RouterHandle,
        events: Arc<EventBus>,
        _dir: TempDir,
    }

    async fn start_router(tabs: Arc<FakeTabs>, oracle: OracleKind) -> Harness {
        let dir = TempDir::new().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().join("config.json")));
        config
            .save(&Config {
                oracle,
                ..Config::default()
            })
            .unwrap();

        let session = Arc::new(Session::new(oracle));
        let bus = Arc::new(Bus::new());
        let events = Arc::new(EventBus::default());
        let tabs_dyn: Arc<dyn Tabs> = tabs.clone();
        let (router, handle, inbound) = SessionRouter::new(
            Arc::clone(&session),
            tabs_dyn,
            Arc::clone(&bus),
            config,
            Arc::clone(&events),
        );
        tokio::spawn(router.run(inbound, CancellationToken::new()));

        Harness {
            bus,
            session,
            tabs,
            handle,
            events,
            _dir: dir,
        }
    }

    fn site_tab() -> ContextInfo {
        ContextInfo::new(
            ContextId(1),
            WindowId(1),
            "https://learning.mheducation.com/course/1",
        )
    }

    fn chatgpt_tab(window: u32) -> ContextInfo {
        ContextInfo::new(ContextId(2), WindowId(window), "https://chatgpt.com/")
    }

    fn question() -> Task {
        Task::new(
            TaskKind::SingleChoice,
            "What is 2 + 2?",
            OptionSet::Flat(vec!["3".into(), "4".into()]),
        )
    }

    /// Spawn an agent that acks everything it receives and records it.
    fn ack_all(
        mut rx: mpsc::Receiver<Delivery>,
        ack: Ack,
    ) -> mpsc::UnboundedReceiver<Message> {
        let (record_tx, record_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let _ = record_tx.send(delivery.envelope.message.clone());
                delivery.acknowledge(ack.clone());
            }
        });
        record_rx
    }

    async fn breathe() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    async fn until_idle(session: &Arc<Session>) {
        while session.relay_in_flight() {
            breathe().await;
        }
    }

    async fn expect_event(
        rx: &mut broadcast::Receiver<CourierEvent>,
        want: fn(&CourierEvent) -> bool,
    ) -> CourierEvent {
        loop {
            let event = rx.recv().await.unwrap();
            if want(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_reaches_oracle_same_window() {
        let tabs = FakeTabs::new(vec![site_tab(), chatgpt_tab(1)]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let mut oracle_rx = ack_all(h.bus.attach(ContextId(2)), Ack::processing());
        let mut events = h.events.subscribe();

        h.handle
            .submit(Envelope::from_context(
                site_tab(),
                Message::SendQuestion {
                    question: question(),
                },
            ))
            .await;

        let delivered = oracle_rx.recv().await.unwrap();
        match delivered {
            Message::ReceiveQuestion { question } => {
                assert_eq!(question.prompt, "What is 2 + 2?")
            }
            other => panic!("unexpected message: {other:?}"),
        }

        expect_event(&mut events, |e| {
            matches!(e, CourierEvent::TaskRelayed { oracle: OracleKind::ChatGpt, .. })
        })
        .await;
        until_idle(&h.session).await;

        // Same window, so the oracle tab was brought forward first.
        assert_eq!(h.tabs.focus_history().first(), Some(&ContextId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_focus_across_windows() {
        let tabs = FakeTabs::new(vec![site_tab(), chatgpt_tab(2)]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let mut oracle_rx = ack_all(h.bus.attach(ContextId(2)), Ack::processing());

        h.handle
            .submit(Envelope::from_context(
                site_tab(),
                Message::SendQuestion {
                    question: question(),
                },
            ))
            .await;

        assert!(matches!(
            oracle_rx.recv().await.unwrap(),
            Message::ReceiveQuestion { .. }
        ));
        until_idle(&h.session).await;
        assert!(h.tabs.focus_history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_question_dropped_while_in_flight() {
        let tabs = FakeTabs::new(vec![site_tab(), chatgpt_tab(1)]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let mut events = h.events.subscribe();

        // Hold the first delivery un-acked so the relay stays in flight.
        let mut oracle_mailbox = h.bus.attach(ContextId(2));
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let held = oracle_mailbox.recv().await.unwrap();
            release_rx.await.unwrap();
            held.acknowledge(Ack::processing());
        });

        h.handle
            .submit(Envelope::from_context(
                site_tab(),
                Message::SendQuestion {
                    question: question(),
                },
            ))
            .await;
        while !h.session.relay_in_flight() {
            breathe().await;
        }

        h.handle
            .submit(Envelope::from_context(
                site_tab(),
                Message::SendQuestion {
                    question: question(),
                },
            ))
            .await;
        expect_event(&mut events, |e| matches!(e, CourierEvent::RelayDropped)).await;

        release_tx.send(()).unwrap();
        until_idle(&h.session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_oracle_alerts_origin_and_releases_flag() {
        let tabs = FakeTabs::new(vec![site_tab()]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let mut site_rx = ack_all(h.bus.attach(ContextId(1)), Ack::ok());
        let mut events = h.events.subscribe();

        h.handle
            .submit(Envelope::from_context(
                site_tab(),
                Message::SendQuestion {
                    question: question(),
                },
            ))
            .await;

        match site_rx.recv().await.unwrap() {
            Message::Alert { message } => assert_eq!(
                message,
                "Please open ChatGPT in another tab before using automation."
            ),
            other => panic!("unexpected message: {other:?}"),
        }
        expect_event(&mut events, |e| {
            matches!(e, CourierEvent::RelayFailed { .. })
        })
        .await;
        until_idle(&h.session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_oracle_alerts_after_retries() {
        // The oracle tab exists but no agent ever attaches, so every
        // delivery attempt fails.
        let tabs = FakeTabs::new(vec![site_tab(), chatgpt_tab(2)]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let mut site_rx = ack_all(h.bus.attach(ContextId(1)), Ack::ok());

        h.handle
            .submit(Envelope::from_context(
                site_tab(),
                Message::SendQuestion {
                    question: question(),
                },
            ))
            .await;

        match site_rx.recv().await.unwrap() {
            Message::Alert { message } => assert_eq!(
                message,
                "Error communicating with ChatGPT. Please make sure it's open in another tab."
            ),
            other => panic!("unexpected message: {other:?}"),
        }
        until_idle(&h.session).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_identity_capture_from_origin() {
        let deepseek = ContextInfo::new(ContextId(7), WindowId(3), "https://chat.deepseek.com/");
        let tabs = FakeTabs::new(vec![deepseek.clone()]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let mut events = h.events.subscribe();

        h.handle
            .submit(Envelope::from_context(deepseek, Message::OpenSettings))
            .await;

        let event = expect_event(&mut events, |e| {
            matches!(e, CourierEvent::SettingsRequested { .. })
        })
        .await;
        assert!(matches!(
            event,
            CourierEvent::SettingsRequested { context: ContextId(7) }
        ));
        assert_eq!(h.session.oracle_slot().unwrap().context, ContextId(7));
        assert_eq!(h.session.oracle_kind(), OracleKind::Deepseek);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_without_study_tab_is_dropped() {
        let oracle = chatgpt_tab(1);
        let tabs = FakeTabs::new(vec![oracle.clone()]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;

        h.handle
            .submit(Envelope::from_context(
                oracle,
                Message::ChatGptResponse {
                    response: r#"{"answer": "4"}"#.into(),
                },
            ))
            .await;

        for _ in 0..5 {
            breathe().await;
        }
        assert!(h.session.task_slot().is_none());
        assert!(h.tabs.focus_history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_focuses_study_tab_and_delivers() {
        let oracle = chatgpt_tab(1);
        let tabs = FakeTabs::new(vec![site_tab(), oracle.clone()]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let mut site_rx = ack_all(h.bus.attach(ContextId(1)), Ack::ok());
        let mut events = h.events.subscribe();

        h.handle
            .submit(Envelope::from_context(
                oracle,
                Message::ChatGptResponse {
                    response: r#"{"answer": "4"}"#.into(),
                },
            ))
            .await;

        match site_rx.recv().await.unwrap() {
            Message::ProcessResponse { response } => {
                assert_eq!(response, r#"{"answer": "4"}"#)
            }
            other => panic!("unexpected message: {other:?}"),
        }
        expect_event(&mut events, |e| {
            matches!(e, CourierEvent::ReplyRelayed { oracle: OracleKind::ChatGpt })
        })
        .await;
        assert_eq!(h.tabs.focus_history(), vec![ContextId(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_restored_to_prior_foreground_tab() {
        let tabs = FakeTabs::new(vec![site_tab(), chatgpt_tab(1)]);
        let h = start_router(tabs, OracleKind::ChatGpt).await;
        let _oracle_rx = ack_all(h.bus.attach(ContextId(2)), Ack::processing());
        let mut events = h.events.subscribe();

        // The user is on the study tab when the question goes out.
        h.tabs.activate(ContextId(1));
        while h.session.last_foreground() != Some(ContextId(1)) {
            breathe().await;
        }

        h.handle
            .submit(Envelope::from_context(
                site_tab(),
                Message::SendQuestion {
                    question: question(),
                },
            ))
            .await;

        expect_event(&mut events, |e| {
            matches!(e, CourierEvent::FocusRestored { context: ContextId(1) })
        })
        .await;
        assert_eq!(h.tabs.focus_history(), vec![ContextId(2), ContextId(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_tab_clears_role_slot() {
        let tabs = FakeTabs::new(vec![site_tab(), chatgpt_tab(1)]);
        let h = start_router(tabs.clone(), OracleKind::ChatGpt).await;
        let mut events = h.events.subscribe();

        // Initial locate fills both slots.
        while h.session.oracle_slot().is_none() {
            breathe().await;
        }
        assert!(h.session.task_slot().is_some());

        tabs.close(ContextId(2));
        expect_event(&mut events, |e| {
            matches!(e, CourierEvent::ContextClosed { context: ContextId(2) })
        })
        .await;
        assert!(h.session.oracle_slot().is_none());
        assert!(h.session.task_slot().is_some());
    }
}
