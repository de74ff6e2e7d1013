//! Reply watching: notice when an oracle has produced a usable payload.
//!
//! One watch round runs two producers against a shared resolve gate. The
//! mutation producer inspects the page whenever its DOM reports a change;
//! the poll producer (enabled for oracle variants whose DOM events are
//! unreliable) inspects on a fixed cadence. Whichever inspects successfully
//! first claims the gate; the loser's later attempts see the gate closed and
//! stand down. A consumer task turns the first hit into a [`WatchOutcome`],
//! or times the round out at the hard deadline.
//!
//! Rounds never overlap: arming force-resets any round in progress, and
//! resolve, reset, and timeout all tear the round down, so a mutation that
//! fires after the round ended inspects nothing.

use crate::events::DetectionPath;
use crate::extract::extract_payload;
use crate::oracle::OraclePage;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Hard deadline for one watch round.
pub const HARD_TIMEOUT: Duration = Duration::from_secs(180);

/// How long strict extraction gets before the loose pattern is allowed.
pub const LOOSE_GRACE: Duration = Duration::from_secs(30);

/// Poll cadence for variants that need the polling fallback.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for one oracle variant's watch rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Run the polling producer alongside the mutation producer.
    pub poll: bool,
    pub poll_interval: Duration,
    pub grace: Duration,
    pub timeout: Duration,
}

impl WatchConfig {
    /// Mutation-driven only, for pages with reliable DOM change events.
    pub fn event_driven() -> Self {
        Self {
            poll: false,
            poll_interval: POLL_INTERVAL,
            grace: LOOSE_GRACE,
            timeout: HARD_TIMEOUT,
        }
    }

    /// Mutation-driven plus a polling safety net.
    pub fn with_polling() -> Self {
        Self {
            poll: true,
            ..Self::event_driven()
        }
    }
}

/// First-wins gate shared by the producers of one round.
#[derive(Debug, Default)]
pub struct ResolveGate {
    resolved: AtomicBool,
}

impl ResolveGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate. Returns true for exactly one caller per round.
    pub fn claim(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }
}

/// How a watch round ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    Resolved {
        /// Scrubbed payload string, ready to relay upstream.
        payload: String,
        via: DetectionPath,
        elapsed: Duration,
    },
    TimedOut {
        waited: Duration,
    },
}

struct Round {
    id: u64,
    cancel: CancellationToken,
}

/// Watches one oracle page for replies, one round at a time.
pub struct ResponseWatcher {
    config: WatchConfig,
    round: Mutex<Option<Round>>,
    next_round: AtomicU64,
}

impl ResponseWatcher {
    pub fn new(config: WatchConfig) -> Self {
        Self {
            config,
            round: Mutex::new(None),
            next_round: AtomicU64::new(0),
        }
    }

    pub fn is_watching(&self) -> bool {
        self.lock_round().is_some()
    }

    /// Tear down the round in progress, if any. Idempotent; safe to call at
    /// any time. Producers and consumer observe the cancellation and stop
    /// without emitting an outcome.
    pub fn reset(&self) {
        if let Some(round) = self.lock_round().take() {
            debug!(round = round.id, "watch round reset");
            round.cancel.cancel();
        }
    }

    /// Start a round against `page`, with `baseline` outputs already on the
    /// page. Any round in progress is force-reset first.
    ///
    /// The returned receiver yields the round's outcome. It closes without a
    /// value if the round is externally reset.
    pub fn arm(
        self: &Arc<Self>,
        page: Arc<dyn OraclePage>,
        baseline: usize,
    ) -> oneshot::Receiver<WatchOutcome> {
        self.reset();

        let round_id = self.next_round.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *self.lock_round() = Some(Round {
            id: round_id,
            cancel: cancel.clone(),
        });

        let gate = Arc::new(ResolveGate::new());
        let started = Instant::now();
        let (hit_tx, mut hit_rx) = mpsc::channel::<(String, DetectionPath)>(2);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        // Mutation producer: inspect on every DOM change signal. Subscribing
        // here rather than inside the task means a signal arriving before the
        // task first runs is buffered, not lost.
        {
            let page = Arc::clone(&page);
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            let hit_tx = hit_tx.clone();
            let grace = self.config.grace;
            let mut mutations = page.mutations();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        received = mutations.recv() => match received {
                            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                                if gate.is_resolved() {
                                    break;
                                }
                                if let Some(payload) =
                                    inspect(page.as_ref(), baseline, started, grace).await
                                {
                                    if gate.claim() {
                                        let _ = hit_tx
                                            .send((payload, DetectionPath::Mutation))
                                            .await;
                                    }
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            });
        }

        // Poll producer: same inspection on a fixed cadence.
        if self.config.poll {
            let page = Arc::clone(&page);
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            let grace = self.config.grace;
            let period = self.config.poll_interval;
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if gate.is_resolved() {
                                break;
                            }
                            if let Some(payload) =
                                inspect(page.as_ref(), baseline, started, grace).await
                            {
                                if gate.claim() {
                                    let _ = hit_tx.send((payload, DetectionPath::Poll)).await;
                                }
                                break;
                            }
                        }
                    }
                }
            });
        }
        drop(hit_tx);

        // Consumer: first hit wins, the deadline loses, external reset
        // concludes silently.
        {
            let watcher = Arc::clone(self);
            let timeout = self.config.timeout;
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => None,
                    hit = first_hit(&mut hit_rx) => {
                        let (payload, via) = hit;
                        Some(WatchOutcome::Resolved {
                            payload,
                            via,
                            elapsed: started.elapsed(),
                        })
                    }
                    _ = tokio::time::sleep(timeout) => {
                        // Close the gate so a late inspection cannot claim it
                        // between the deadline firing and the teardown below.
                        gate.claim();
                        Some(WatchOutcome::TimedOut { waited: timeout })
                    }
                };

                if let Some(outcome) = outcome {
                    watcher.finish(round_id);
                    let _ = outcome_tx.send(outcome);
                }
            });
        }

        outcome_rx
    }

    /// Tear down a specific round, leaving any newer round untouched.
    fn finish(&self, round_id: u64) {
        let mut guard = self.lock_round();
        if guard.as_ref().map(|r| r.id) == Some(round_id) {
            if let Some(round) = guard.take() {
                round.cancel.cancel();
            }
        }
    }

    fn lock_round(&self) -> std::sync::MutexGuard<'_, Option<Round>> {
        self.round.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wait for the first hit; pend forever if all producers give up without
/// one, leaving the deadline or an external reset to conclude the round.
async fn first_hit(
    rx: &mut mpsc::Receiver<(String, DetectionPath)>,
) -> (String, DetectionPath) {
    match rx.recv().await {
        Some(hit) => hit,
        None => std::future::pending().await,
    }
}

/// One inspection pass: anything new beyond the baseline, run through the
/// extraction ladder. Page errors read as "nothing yet".
async fn inspect(
    page: &dyn OraclePage,
    baseline: usize,
    started: Instant,
    grace: Duration,
) -> Option<String> {
    let count = match page.output_count().await {
        Ok(count) => count,
        Err(err) => {
            trace!("output count unavailable: {err}");
            return None;
        }
    };
    if count <= baseline {
        return None;
    }

    let snapshots = match page.outputs_after(baseline).await {
        Ok(snapshots) => snapshots,
        Err(err) => {
            trace!("output snapshot unavailable: {err}");
            return None;
        }
    };

    let elapsed = started.elapsed();
    snapshots
        .iter()
        .find_map(|snapshot| extract_payload(snapshot, elapsed, grace))
}
