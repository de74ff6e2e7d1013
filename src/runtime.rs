//! Daemon assembly: one browser connection, one router, one control socket,
//! and an agent pair per tab the orchestration cares about.
//!
//! The reconcile loop is the only place agents are born and buried. It walks
//! the tab registry about once a second, attaches a site agent plus cycle
//! controller to every study tab and an oracle agent to every chat tab, and
//! tears an agent down when its tab closes or navigates off-pattern.

use crate::bus::Bus;
use crate::cdp::{CdpBrowser, CdpPage};
use crate::config::ConfigStore;
use crate::control::{ControlServer, ControlState};
use crate::cycle::{AutomationSwitch, CycleController};
use crate::events::{CourierEvent, EventBus};
use crate::oracle::{
    chatgpt::ChatGptPage, deepseek::DeepseekPage, gemini::GeminiPage, OracleKind, OraclePage,
    OracleRunner,
};
use crate::router::{RouterHandle, SessionRouter};
use crate::session::Session;
use crate::site::{self, smartbook::SmartbookPage, SitePage, SiteRunner};
use crate::transport::{ContextId, ContextInfo, TabEvent, Tabs};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often the reconcile loop re-walks the tab registry.
const RECONCILE_INTERVAL: Duration = Duration::from_secs(1);

/// Reply payloads queued between a site agent and its cycle controller.
const REPLY_CAPACITY: usize = 8;

/// Startup knobs, all optional. The config file fills the gaps.
pub struct RuntimeOptions {
    /// DevTools endpoint override; falls back to the configured one.
    pub devtools_url: Option<String>,
    /// Control socket path.
    pub socket_path: PathBuf,
    /// Config file override, for tests and odd installs.
    pub config_path: Option<PathBuf>,
    /// Whether the automation loop starts enabled.
    pub automation_on: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            devtools_url: None,
            socket_path: crate::control::default_socket_path(),
            config_path: None,
            automation_on: true,
        }
    }
}

/// Which job an attached agent pair is doing for its tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentRole {
    Site,
    Oracle(OracleKind),
}

impl AgentRole {
    fn matches(&self, url: &str) -> bool {
        match self {
            Self::Site => site::url_pattern().matches(url),
            Self::Oracle(kind) => kind.url_pattern().matches(url),
        }
    }
}

struct AgentHandle {
    role: AgentRole,
    cancel: CancellationToken,
}

/// Connect, assemble, and drive the daemon until cancelled.
pub async fn run(options: RuntimeOptions, cancel: CancellationToken) -> Result<()> {
    let config = Arc::new(match &options.config_path {
        Some(path) => ConfigStore::open(path),
        None => ConfigStore::at_default(),
    });
    let devtools_url = match &options.devtools_url {
        Some(url) => url.clone(),
        None => config.load()?.devtools_url,
    };

    let browser = CdpBrowser::connect(&devtools_url)
        .await
        .with_context(|| format!("could not attach to browser at {devtools_url}"))?;
    let tabs: Arc<dyn Tabs> = browser.clone();

    let events = Arc::new(EventBus::default());
    let bus = Arc::new(Bus::new());
    let oracle_kind = config.oracle_kind();
    let session = Arc::new(Session::new(oracle_kind));
    let switch = AutomationSwitch::new(options.automation_on);

    let (router, handle, inbound) = SessionRouter::new(
        Arc::clone(&session),
        Arc::clone(&tabs),
        Arc::clone(&bus),
        Arc::clone(&config),
        Arc::clone(&events),
    );

    let refresh_task = Arc::clone(&browser).spawn_refresh(cancel.clone());
    let router_task = tokio::spawn(router.run(inbound, cancel.clone()));

    let control = ControlServer::new(
        &options.socket_path,
        ControlState::new(
            Arc::clone(&session),
            switch.clone(),
            Arc::clone(&config),
            Arc::clone(&tabs),
            Arc::clone(&events),
        ),
    );
    let control_cancel = cancel.clone();
    let control_task = tokio::spawn(async move {
        if let Err(err) = control.run(control_cancel).await {
            error!("control socket failed: {err:#}");
        }
    });

    info!(
        version = env!("CARGO_PKG_VERSION"),
        oracle = oracle_kind.as_str(),
        devtools = %devtools_url,
        "courier runtime started"
    );
    events.emit(CourierEvent::RuntimeStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        oracle: oracle_kind,
        socket_path: options.socket_path.display().to_string(),
    });

    reconcile_loop(
        &browser, &bus, &handle, &switch, &events, &cancel,
    )
    .await;

    // Everything below us watches the same token; just wait it out.
    let _ = router_task.await;
    let _ = control_task.await;
    let _ = refresh_task.await;
    info!("courier runtime stopped");
    Ok(())
}

/// Attach and detach agents as tabs come and go, until cancelled.
async fn reconcile_loop(
    browser: &Arc<CdpBrowser>,
    bus: &Arc<Bus>,
    router: &RouterHandle,
    switch: &AutomationSwitch,
    events: &Arc<EventBus>,
    cancel: &CancellationToken,
) {
    let mut agents: HashMap<ContextId, AgentHandle> = HashMap::new();
    let mut tab_events = browser.subscribe();
    let mut tick = tokio::time::interval(RECONCILE_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                reconcile(browser, bus, router, switch, events, cancel, &mut agents).await;
            }
            event = tab_events.recv() => match event {
                Ok(TabEvent::Closed(context)) => {
                    if let Some(agent) = agents.remove(&context) {
                        retire(context, agent, bus);
                    }
                }
                Ok(TabEvent::Navigated { context, url }) => {
                    // Navigating within the pattern keeps the agent; leaving
                    // it retires the pair. Reattach happens on the next tick.
                    let off_pattern = agents
                        .get(&context)
                        .is_some_and(|agent| !agent.role.matches(&url));
                    if off_pattern {
                        if let Some(agent) = agents.remove(&context) {
                            retire(context, agent, bus);
                        }
                    }
                }
                Ok(TabEvent::Activated(_)) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "tab event stream lagged in reconcile loop");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    for (context, agent) in agents.drain() {
        retire(context, agent, bus);
    }
}

async fn reconcile(
    browser: &Arc<CdpBrowser>,
    bus: &Arc<Bus>,
    router: &RouterHandle,
    switch: &AutomationSwitch,
    events: &Arc<EventBus>,
    cancel: &CancellationToken,
    agents: &mut HashMap<ContextId, AgentHandle>,
) {
    // Drop agents whose tab vanished or wandered off-pattern first so a
    // reused context id cannot inherit a stale agent.
    let mut retired = Vec::new();
    agents.retain(|context, agent| match browser.info(*context) {
        Some(info) if agent.role.matches(&info.url) => true,
        _ => {
            retired.push((*context, agent.cancel.clone()));
            false
        }
    });
    for (context, agent_cancel) in retired {
        agent_cancel.cancel();
        bus.detach(context);
        info!(%context, "agent retired");
    }

    for info in browser.query(&site::url_pattern()).await {
        if agents.contains_key(&info.id) {
            continue;
        }
        let context = info.id;
        match attach_site(browser, bus, router, switch, events, info, cancel).await {
            Ok(agent) => {
                agents.insert(context, agent);
            }
            Err(err) => warn!(%context, "could not attach study tab: {err:#}"),
        }
    }

    // Every open oracle tab gets an agent; the router picks the active one
    // at relay time.
    for kind in OracleKind::all() {
        for info in browser.query(&kind.url_pattern()).await {
            if agents.contains_key(&info.id) {
                continue;
            }
            let context = info.id;
            match attach_oracle(browser, bus, router, events, kind, info, cancel).await {
                Ok(agent) => {
                    agents.insert(context, agent);
                }
                Err(err) => {
                    warn!(%context, oracle = kind.as_str(), "could not attach oracle tab: {err:#}");
                }
            }
        }
    }
}

fn retire(context: ContextId, agent: AgentHandle, bus: &Bus) {
    agent.cancel.cancel();
    bus.detach(context);
    info!(%context, role = ?agent.role, "agent retired");
}

async fn attach_site(
    browser: &Arc<CdpBrowser>,
    bus: &Bus,
    router: &RouterHandle,
    switch: &AutomationSwitch,
    events: &Arc<EventBus>,
    info: ContextInfo,
    cancel: &CancellationToken,
) -> Result<AgentHandle> {
    let page = browser
        .page(info.id)
        .context("tab vanished before attach")?;
    let cdp = CdpPage::attach(page).await?;
    browser.track_foreground(info.id, &cdp);

    let site_page: Arc<dyn SitePage> = Arc::new(SmartbookPage::new(cdp));
    let mailbox = bus.attach(info.id);
    let (reply_tx, reply_rx) = mpsc::channel(REPLY_CAPACITY);
    let agent_cancel = cancel.child_token();

    let runner = SiteRunner::new(info.clone(), Arc::clone(&site_page), mailbox, reply_tx);
    let controller = CycleController::new(
        site_page,
        router.clone(),
        info.clone(),
        switch.clone(),
        Arc::clone(events),
        reply_rx,
    );
    tokio::spawn(runner.run(agent_cancel.clone()));
    tokio::spawn(controller.run(agent_cancel.clone()));

    info!(context = %info.id, url = %info.url, "study tab attached");
    Ok(AgentHandle {
        role: AgentRole::Site,
        cancel: agent_cancel,
    })
}

async fn attach_oracle(
    browser: &Arc<CdpBrowser>,
    bus: &Bus,
    router: &RouterHandle,
    events: &Arc<EventBus>,
    kind: OracleKind,
    info: ContextInfo,
    cancel: &CancellationToken,
) -> Result<AgentHandle> {
    let page = browser
        .page(info.id)
        .context("tab vanished before attach")?;
    let cdp = CdpPage::attach(page).await?;
    browser.track_foreground(info.id, &cdp);

    let oracle_page: Arc<dyn OraclePage> = match kind {
        OracleKind::ChatGpt => Arc::new(ChatGptPage::new(cdp)),
        OracleKind::Gemini => Arc::new(GeminiPage::new(cdp)),
        OracleKind::Deepseek => Arc::new(DeepseekPage::new(cdp)),
    };
    let mailbox = bus.attach(info.id);
    let agent_cancel = cancel.child_token();

    let runner = OracleRunner::new(
        info.clone(),
        oracle_page,
        router.clone(),
        Arc::clone(events),
        mailbox,
    );
    tokio::spawn(runner.run(agent_cancel.clone()));

    info!(context = %info.id, oracle = kind.as_str(), url = %info.url, "oracle tab attached");
    Ok(AgentHandle {
        role: AgentRole::Oracle(kind),
        cancel: agent_cancel,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_matches_its_pattern_only() {
        let site = AgentRole::Site;
        assert!(site.matches("https://learning.mheducation.com/lesson/9"));
        assert!(!site.matches("https://chatgpt.com/"));

        let oracle = AgentRole::Oracle(OracleKind::Deepseek);
        assert!(oracle.matches("https://chat.deepseek.com/a/chat"));
        assert!(!oracle.matches("https://gemini.google.com/app"));
    }

    #[test]
    fn test_default_options_point_at_home_socket() {
        let options = RuntimeOptions::default();
        assert!(options.automation_on);
        assert!(options
            .socket_path
            .to_string_lossy()
            .ends_with("courier.sock"));
    }
}
