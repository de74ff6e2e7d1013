//! DevTools-backed implementations of the browser seams.
//!
//! [`CdpBrowser`] attaches to an already-running browser over its DevTools
//! endpoint, mirrors the target list into a registry of stable context ids,
//! and implements [`Tabs`] on top of it. [`CdpPage`] wraps one page with
//! evaluation helpers and the injected signal binding that feeds mutation
//! and visibility streams. Everything above this module sees traits and
//! channels, never the protocol.

pub mod js;

use crate::transport::{ContextId, ContextInfo, TabEvent, Tabs, UrlPattern, WindowId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::GetWindowForTargetParams;
use chromiumoxide::cdp::js_protocol::runtime::{AddBindingParams, EnableParams, EventBindingCalled};
use chromiumoxide::page::Page;
use dashmap::DashMap;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Cadence of tab registry reconciliation.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Poll cadence for [`CdpPage::wait_for`].
const WAIT_POLL: Duration = Duration::from_millis(100);

const MUTATION_CAPACITY: usize = 32;

/// Window ids above this base are synthetic, assigned when the browser
/// cannot answer a window lookup. Each such tab gets a window of its own,
/// so it never counts as sharing a window with anything.
const SYNTHETIC_WINDOW_BASE: u32 = 1 << 30;

/// Find a Chromium-family binary for `doctor` diagnostics.
pub fn find_browser() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("COURIER_BROWSER_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Resolve a DevTools endpoint to its websocket debugger URL.
///
/// `ws://` URLs pass through untouched; `http(s)://` endpoints are asked
/// via `/json/version`, which is how a browser started with
/// `--remote-debugging-port` advertises its socket.
pub async fn resolve_ws_url(devtools_url: &str) -> Result<String> {
    if devtools_url.starts_with("ws://") || devtools_url.starts_with("wss://") {
        return Ok(devtools_url.to_string());
    }
    let version_url = format!("{}/json/version", devtools_url.trim_end_matches('/'));
    let response = reqwest::get(&version_url)
        .await
        .with_context(|| format!("devtools endpoint unreachable at {version_url}"))?;
    let body: serde_json::Value = response
        .json()
        .await
        .context("devtools version reply was not JSON")?;
    body.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .context("devtools version reply carries no webSocketDebuggerUrl")
}

/// Fetch the browser's version banner without attaching. Used by `doctor`.
pub async fn probe_endpoint(devtools_url: &str) -> Result<String> {
    let version_url = format!("{}/json/version", devtools_url.trim_end_matches('/'));
    let response = reqwest::get(&version_url)
        .await
        .with_context(|| format!("devtools endpoint unreachable at {version_url}"))?;
    let body: serde_json::Value = response
        .json()
        .await
        .context("devtools version reply was not JSON")?;
    Ok(body
        .get("Browser")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown browser")
        .to_string())
}

struct TabEntry {
    target: String,
    page: Page,
    window: WindowId,
    url: String,
}

/// Registry of the attached browser's tabs, with focus control.
///
/// Context ids are stable for the lifetime of a tab; a tab that closes and
/// a new one at the same URL are different contexts. Window membership is
/// resolved once per tab via `Browser.getWindowForTarget`.
pub struct CdpBrowser {
    browser: Browser,
    tabs: DashMap<ContextId, TabEntry>,
    by_target: DashMap<String, ContextId>,
    next_id: AtomicU32,
    events: broadcast::Sender<TabEvent>,
}

impl CdpBrowser {
    /// Attach to a running browser's DevTools endpoint and take a first
    /// snapshot of its tabs.
    pub async fn connect(devtools_url: &str) -> Result<Arc<Self>> {
        let ws_url = resolve_ws_url(devtools_url).await?;
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .context("failed to attach to the browser's devtools socket")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let (events, _) = broadcast::channel(64);
        let this = Arc::new(Self {
            browser,
            tabs: DashMap::new(),
            by_target: DashMap::new(),
            next_id: AtomicU32::new(1),
            events,
        });
        this.refresh().await?;
        Ok(this)
    }

    /// Reconcile the registry against the browser's current target list.
    /// New tabs get fresh context ids, vanished tabs emit
    /// [`TabEvent::Closed`], URL changes emit [`TabEvent::Navigated`].
    pub async fn refresh(&self) -> Result<()> {
        let pages = self
            .browser
            .pages()
            .await
            .context("failed to list browser pages")?;
        let mut seen = HashSet::with_capacity(pages.len());

        for page in pages {
            let target = page.target_id().inner().clone();
            // A tab closing mid-scan answers with an error; the removal
            // pass below picks it up.
            let url = match page.url().await {
                Ok(url) => url.unwrap_or_default(),
                Err(_) => continue,
            };
            seen.insert(target.clone());

            if let Some(id) = self.by_target.get(&target).map(|entry| *entry.value()) {
                if let Some(mut entry) = self.tabs.get_mut(&id) {
                    if entry.url != url {
                        entry.url = url.clone();
                        let _ = self.events.send(TabEvent::Navigated { context: id, url });
                    }
                }
                continue;
            }

            let id = ContextId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let window = match self.window_of(&target).await {
                Ok(window) => window,
                Err(err) => {
                    debug!(%target, "window lookup failed: {err:#}");
                    WindowId(SYNTHETIC_WINDOW_BASE + id.0)
                }
            };
            debug!(context = %id, window = %window, url = %url, "tab discovered");
            self.by_target.insert(target.clone(), id);
            self.tabs.insert(
                id,
                TabEntry {
                    target,
                    page,
                    window,
                    url,
                },
            );
        }

        let gone: Vec<(ContextId, String)> = self
            .tabs
            .iter()
            .filter(|entry| !seen.contains(&entry.target))
            .map(|entry| (*entry.key(), entry.target.clone()))
            .collect();
        for (id, target) in gone {
            self.tabs.remove(&id);
            self.by_target.remove(&target);
            debug!(context = %id, "tab closed");
            let _ = self.events.send(TabEvent::Closed(id));
        }

        Ok(())
    }

    /// Drive periodic reconciliation until cancelled.
    pub fn spawn_refresh(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REFRESH_INTERVAL);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(err) = self.refresh().await {
                            warn!("tab registry refresh failed: {err:#}");
                        }
                    }
                }
            }
        })
    }

    async fn window_of(&self, target: &str) -> Result<WindowId> {
        let params = GetWindowForTargetParams::builder()
            .target_id(target.to_string())
            .build();
        let resp = self.browser.execute(params).await?;
        Ok(WindowId(*resp.result.window_id.inner() as u32))
    }

    /// Live page handle for a registered tab.
    pub fn page(&self, context: ContextId) -> Option<Page> {
        self.tabs.get(&context).map(|entry| entry.page.clone())
    }

    pub fn info(&self, context: ContextId) -> Option<ContextInfo> {
        self.tabs
            .get(&context)
            .map(|entry| ContextInfo::new(context, entry.window, entry.url.clone()))
    }

    /// Forward a page's visibility signals into the tab event stream, so
    /// foreground bookkeeping follows the user's tab switches.
    pub fn track_foreground(&self, context: ContextId, page: &CdpPage) {
        let mut visibility = page.visibility();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match visibility.recv().await {
                    Ok(true) => {
                        let _ = events.send(TabEvent::Activated(context));
                    }
                    Ok(false) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[async_trait]
impl Tabs for CdpBrowser {
    async fn query(&self, pattern: &UrlPattern) -> Vec<ContextInfo> {
        let mut matches: Vec<ContextInfo> = self
            .tabs
            .iter()
            .filter(|entry| pattern.matches(&entry.url))
            .map(|entry| ContextInfo::new(*entry.key(), entry.window, entry.url.clone()))
            .collect();
        matches.sort_by_key(|info| info.id);
        matches
    }

    async fn focus(&self, context: ContextId) -> bool {
        let page = match self.tabs.get(&context) {
            Some(entry) => entry.page.clone(),
            None => return false,
        };
        match page.activate().await {
            Ok(_) => {
                let _ = self.events.send(TabEvent::Activated(context));
                true
            }
            Err(err) => {
                debug!(context = %context, "activate failed: {err:#}");
                false
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TabEvent> {
        self.events.subscribe()
    }
}

/// One live page: evaluation plus the injected signal binding.
pub struct CdpPage {
    page: Page,
    mutations: broadcast::Sender<()>,
    visibility: broadcast::Sender<bool>,
}

impl CdpPage {
    /// Register the signal binding on a page, spawn its event pump, and
    /// install the page-side observers.
    pub async fn attach(page: Page) -> Result<Self> {
        page.execute(EnableParams::default())
            .await
            .context("Runtime.enable failed")?;
        page.execute(AddBindingParams::new(js::SIGNAL_BINDING))
            .await
            .context("signal binding registration failed")?;

        let (mutations, _) = broadcast::channel(MUTATION_CAPACITY);
        let (visibility, _) = broadcast::channel(8);

        let mut bindings = page
            .event_listener::<EventBindingCalled>()
            .await
            .context("binding event stream failed")?;
        let mutation_tx = mutations.clone();
        let visibility_tx = visibility.clone();
        tokio::spawn(async move {
            while let Some(event) = bindings.next().await {
                if event.name != js::SIGNAL_BINDING {
                    continue;
                }
                match event.payload.as_str() {
                    js::SIGNAL_MUTATION => {
                        let _ = mutation_tx.send(());
                    }
                    js::SIGNAL_VISIBLE => {
                        let _ = visibility_tx.send(true);
                    }
                    js::SIGNAL_HIDDEN => {
                        let _ = visibility_tx.send(false);
                    }
                    other => trace!(payload = other, "unrecognized page signal"),
                }
            }
        });

        let this = Self {
            page,
            mutations,
            visibility,
        };
        this.ensure_observer().await?;
        Ok(this)
    }

    /// (Re)install the page-side observers. Idempotent per document; a
    /// fresh document after navigation gets a fresh observer.
    pub async fn ensure_observer(&self) -> Result<()> {
        let _: serde_json::Value = self.eval(&js::observer_install()).await?;
        Ok(())
    }

    /// Evaluate a script and deserialize its completion value.
    pub async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("script evaluation failed")?;
        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("unexpected script result: {e:?}"))
    }

    /// Evaluate a script for its side effect, ignoring the completion value.
    pub async fn run(&self, script: &str) -> Result<()> {
        self.page
            .evaluate(script)
            .await
            .context("script evaluation failed")?;
        Ok(())
    }

    /// Poll a boolean expression until it reports true or the deadline
    /// passes. Probe errors are treated as "not yet".
    pub async fn wait_for(&self, script: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.eval::<bool>(script).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => trace!("condition probe failed: {err:#}"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
    }

    pub fn mutations(&self) -> broadcast::Receiver<()> {
        self.mutations.subscribe()
    }

    pub fn visibility(&self) -> broadcast::Receiver<bool> {
        self.visibility.subscribe()
    }

    pub async fn current_url(&self) -> Result<String> {
        Ok(self
            .page
            .url()
            .await
            .context("failed to read page url")?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chromiumoxide::browser::BrowserConfig;

    #[tokio::test]
    async fn test_ws_urls_pass_through_unresolved() {
        let url = "ws://127.0.0.1:9222/devtools/browser/abc";
        assert_eq!(resolve_ws_url(url).await.unwrap(), url);
    }

    #[tokio::test]
    #[ignore] // Requires a Chromium binary on the machine
    async fn test_page_eval_and_signal_binding() {
        let path = find_browser().expect("no chromium found");
        let config = BrowserConfig::builder()
            .chrome_executable(path)
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .build()
            .expect("browser config");
        let (browser, mut handler) = Browser::launch(config).await.expect("launch failed");
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("data:text/html,<div id='root'>hi</div>")
            .await
            .expect("new page");
        let cdp = CdpPage::attach(page).await.expect("attach failed");

        let text: String = cdp
            .eval("document.querySelector('#root').textContent")
            .await
            .expect("eval failed");
        assert_eq!(text, "hi");

        let mut mutations = cdp.mutations();
        cdp.run("document.querySelector('#root').appendChild(document.createElement('p'))")
            .await
            .expect("mutate failed");
        let signal =
            tokio::time::timeout(Duration::from_secs(5), mutations.recv()).await;
        assert!(signal.is_ok(), "no mutation signal within 5s");

        let found = cdp
            .wait_for(
                "document.querySelectorAll('#root p').length === 1",
                Duration::from_secs(2),
            )
            .await
            .expect("wait failed");
        assert!(found);
    }
}
