//! Browser-side identity: contexts, windows, tab events, and URL patterns.
//!
//! A "context" is one browser tab. The orchestration core never touches the
//! DevTools protocol directly — it sees tabs only through the [`Tabs`] trait,
//! which the CDP layer implements for a live browser and tests implement
//! with in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use url::Url;

/// Opaque identifier for one browser tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

/// Opaque identifier for the browser window a tab lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "win:{}", self.0)
    }
}

/// A tab's identity as the router sees it: id, owning window, current URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub id: ContextId,
    pub window: WindowId,
    pub url: String,
}

impl ContextInfo {
    pub fn new(id: ContextId, window: WindowId, url: impl Into<String>) -> Self {
        Self {
            id,
            window,
            url: url.into(),
        }
    }
}

/// Lifecycle notifications for tabs the runtime may care about.
#[derive(Debug, Clone, PartialEq)]
pub enum TabEvent {
    /// The tab became the foreground tab of its window.
    Activated(ContextId),
    /// The tab was closed or its target vanished.
    Closed(ContextId),
    /// The tab navigated to a new URL.
    Navigated { context: ContextId, url: String },
}

/// A prefix-style URL pattern, e.g. `https://chatgpt.com/*`.
///
/// Matching is a plain prefix test against the part before the trailing `*`,
/// which is how tab queries behave in every browser this runtime drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    prefix: String,
}

impl UrlPattern {
    /// Build a pattern from `scheme://host/path*` form. A bare URL without a
    /// trailing `*` matches only itself as a prefix.
    pub fn new(pattern: &str) -> Self {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern).to_string();
        Self { prefix }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        candidate.starts_with(&self.prefix)
    }

    /// Host component of the pattern, for log lines and user-facing text.
    pub fn host(&self) -> String {
        Url::parse(&self.prefix)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.prefix.clone())
    }

    pub fn as_str(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}*", self.prefix)
    }
}

/// Read-only view of the browser's tabs plus focus control.
///
/// `query` never fails: a browser that cannot answer reports no matches and
/// the caller treats the role as absent. `focus` reports success so callers
/// can decide whether settle delays are worth waiting out.
#[async_trait]
pub trait Tabs: Send + Sync {
    /// All open tabs whose URL matches the pattern, in tab order.
    async fn query(&self, pattern: &UrlPattern) -> Vec<ContextInfo>;

    /// Bring the tab to the foreground of its window.
    async fn focus(&self, context: ContextId) -> bool;

    /// Subscribe to tab lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<TabEvent>;
}
