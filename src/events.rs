// Copyright 2026 Courier Contributors
// SPDX-License-Identifier: Apache-2.0

//! Courier Event Bus — typed events from every component.
//!
//! The EventBus is a `tokio::sync::broadcast` channel carrying
//! [`CourierEvent`] values. Any consumer — the control socket, log files,
//! tests — can subscribe independently. When no subscribers exist, events
//! are silently dropped (zero overhead).

use crate::oracle::OracleKind;
use crate::task::TaskKind;
use crate::transport::ContextId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Which detection strategy produced a watch resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPath {
    Mutation,
    Poll,
}

/// Every event Courier emits. Serialized to JSON for socket streaming.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CourierEvent {
    // ── Relay Events ──────────────────────
    /// The router accepted a question and began relaying it.
    RelayStarted { oracle: OracleKind, kind: TaskKind },
    /// A question reached the oracle tab (delivery acked).
    TaskRelayed { oracle: OracleKind, kind: TaskKind },
    /// A relay could not complete; the user saw an alert instead.
    RelayFailed { oracle: OracleKind, reason: String },
    /// A new question arrived while one was already in flight and was dropped.
    RelayDropped,
    /// An oracle reply payload was handed back to the study tab.
    ReplyRelayed { oracle: OracleKind },

    // ── Watch Events ──────────────────────
    /// The reply watcher detected a payload.
    WatchResolved {
        oracle: OracleKind,
        via: DetectionPath,
        elapsed_ms: u64,
    },
    /// The reply watcher gave up after the hard deadline.
    WatchTimedOut { oracle: OracleKind, waited_ms: u64 },

    // ── Automation Events ─────────────────
    /// The page cycle submitted a question upstream.
    TaskSubmitted { kind: TaskKind, corrected: bool },
    /// An answer was applied on the study page.
    AnswerApplied { kind: TaskKind, gradable: bool },
    /// The page graded the applied answer as correct.
    GradedCorrect,
    /// The page graded the applied answer as incorrect; the correction is
    /// held for the next question.
    GradedIncorrect { prior_prompt: String },
    /// The automation loop was switched on or off.
    AutomationChanged { on: bool, reason: String },

    // ── Focus Events ──────────────────────
    /// A tab was brought to the foreground by the router.
    FocusClaimed { context: ContextId },
    /// The previously focused tab was restored.
    FocusRestored { context: ContextId },

    // ── System Events ─────────────────────
    /// Courier runtime started.
    RuntimeStarted {
        version: String,
        oracle: OracleKind,
        socket_path: String,
    },
    /// A tab filling a session role was closed.
    ContextClosed { context: ContextId },
    /// A page asked for the settings surface.
    SettingsRequested { context: ContextId },
}

/// The central event bus for Courier.
///
/// All components emit events through this bus. Consumers subscribe
/// to receive a stream of all events.
pub struct EventBus {
    sender: broadcast::Sender<CourierEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: CourierEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<CourierEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
