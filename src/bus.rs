//! In-process message bus between the router and per-tab agents.
//!
//! Each attached context owns one mailbox. A send hands the receiving agent
//! an [`Envelope`] plus a one-shot ack channel; "unreachable" means no agent
//! is attached for that context yet, which is exactly the window between a
//! tab existing and its agent being wired up.

use crate::messages::{Ack, Envelope};
use crate::transport::ContextId;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Mailbox depth per context. Traffic is a handful of envelopes per question
/// round, so this only has to absorb short bursts.
const MAILBOX_CAPACITY: usize = 16;

/// One envelope in flight to an agent, with its ack channel.
#[derive(Debug)]
pub struct Delivery {
    pub envelope: Envelope,
    pub ack: oneshot::Sender<Ack>,
}

impl Delivery {
    /// Acknowledge receipt. Dropping the delivery without calling this shows
    /// up at the sender as [`SendError::NoAck`].
    pub fn acknowledge(self, ack: Ack) {
        let _ = self.ack.send(ack);
    }
}

/// Why a single send attempt failed.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no agent attached for {0}")]
    Unreachable(ContextId),
    #[error("mailbox for {0} is closed")]
    Closed(ContextId),
    #[error("agent for {0} dropped the envelope without acknowledging")]
    NoAck(ContextId),
}

/// The bus itself: a registry of live mailboxes.
#[derive(Debug, Default)]
pub struct Bus {
    mailboxes: DashMap<ContextId, mpsc::Sender<Delivery>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            mailboxes: DashMap::new(),
        }
    }

    /// Register a mailbox for a context, returning the receiving end.
    /// Re-attaching replaces any previous mailbox.
    pub fn attach(&self, context: ContextId) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        if self.mailboxes.insert(context, tx).is_some() {
            debug!(%context, "replaced existing mailbox");
        }
        rx
    }

    /// Remove a context's mailbox. Subsequent sends report unreachable.
    pub fn detach(&self, context: ContextId) {
        self.mailboxes.remove(&context);
    }

    pub fn is_attached(&self, context: ContextId) -> bool {
        self.mailboxes.contains_key(&context)
    }

    /// One delivery attempt: enqueue the envelope and wait for the agent's
    /// ack. No retries at this layer.
    pub async fn send_once(&self, context: ContextId, envelope: Envelope) -> Result<Ack, SendError> {
        let sender = match self.mailboxes.get(&context) {
            Some(entry) => entry.value().clone(),
            None => return Err(SendError::Unreachable(context)),
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let delivery = Delivery {
            envelope,
            ack: ack_tx,
        };

        if sender.send(delivery).await.is_err() {
            // Agent task is gone; drop the stale mailbox so later sends see
            // unreachable instead of closed.
            self.mailboxes.remove(&context);
            return Err(SendError::Closed(context));
        }

        ack_rx.await.map_err(|_| SendError::NoAck(context))
    }
}
