//! The single orchestration session: which tab plays which role right now.
//!
//! There is exactly one session per runtime. Only the router mutates it;
//! everything else gets read-only snapshots. The relay-in-flight flag is the
//! one concurrency-sensitive piece, so it lives in an atomic with a scoped
//! guard instead of a bare boolean that error paths could forget to clear.

use crate::oracle::OracleKind;
use crate::transport::{ContextId, WindowId};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// A role assignment: the tab filling it and the window that tab lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub context: ContextId,
    pub window: WindowId,
}

impl Slot {
    pub fn new(context: ContextId, window: WindowId) -> Self {
        Self { context, window }
    }
}

#[derive(Debug, Clone, Default)]
struct Roles {
    task: Option<Slot>,
    oracle: Option<Slot>,
    oracle_kind: OracleKind,
    last_foreground: Option<ContextId>,
}

/// Read-only view of the session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub task: Option<Slot>,
    pub oracle: Option<Slot>,
    pub oracle_kind: OracleKind,
    pub last_foreground: Option<ContextId>,
    pub relay_in_flight: bool,
}

/// Session state. See module docs for the mutation discipline.
#[derive(Debug, Default)]
pub struct Session {
    roles: Mutex<Roles>,
    in_flight: AtomicBool,
}

impl Session {
    pub fn new(oracle_kind: OracleKind) -> Self {
        Self {
            roles: Mutex::new(Roles {
                oracle_kind,
                ..Roles::default()
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    fn roles(&self) -> std::sync::MutexGuard<'_, Roles> {
        self.roles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn task_slot(&self) -> Option<Slot> {
        self.roles().task
    }

    pub fn oracle_slot(&self) -> Option<Slot> {
        self.roles().oracle
    }

    pub fn oracle_kind(&self) -> OracleKind {
        self.roles().oracle_kind
    }

    pub fn last_foreground(&self) -> Option<ContextId> {
        self.roles().last_foreground
    }

    pub fn set_task_slot(&self, context: ContextId, window: WindowId) {
        self.roles().task = Some(Slot::new(context, window));
    }

    /// Record the oracle tab and which kind it is serving.
    pub fn set_oracle_slot(&self, kind: OracleKind, context: ContextId, window: WindowId) {
        let mut roles = self.roles();
        roles.oracle = Some(Slot::new(context, window));
        roles.oracle_kind = kind;
    }

    /// Record the active oracle kind without touching the slot. A previously
    /// located tab stays known until explicitly cleared.
    pub fn set_oracle_kind(&self, kind: OracleKind) {
        self.roles().oracle_kind = kind;
    }

    pub fn note_foreground(&self, context: ContextId) {
        self.roles().last_foreground = Some(context);
    }

    /// Tear down whatever role a closed tab was filling. Returns true if the
    /// tab held a role.
    pub fn clear_context(&self, context: ContextId) -> bool {
        let mut roles = self.roles();
        let mut cleared = false;
        if roles.task.map(|s| s.context) == Some(context) {
            roles.task = None;
            cleared = true;
        }
        if roles.oracle.map(|s| s.context) == Some(context) {
            roles.oracle = None;
            cleared = true;
        }
        cleared
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let roles = self.roles();
        SessionSnapshot {
            task: roles.task,
            oracle: roles.oracle,
            oracle_kind: roles.oracle_kind,
            last_foreground: roles.last_foreground,
            relay_in_flight: self.relay_in_flight(),
        }
    }

    /// Claim the relay flag. `None` means a relay is already in flight and
    /// the new request should be dropped, not queued.
    pub fn try_begin_relay(self: &Arc<Self>) -> Option<RelayGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RelayGuard {
                session: Arc::clone(self),
            })
    }

    pub fn relay_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Holds the relay-in-flight flag for its lifetime. Dropping it releases the
/// flag on every exit path, early returns and panics included.
#[derive(Debug)]
pub struct RelayGuard {
    session: Arc<Session>,
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        self.session.in_flight.store(false, Ordering::Release);
    }
}
