//! Reliable delivery: fixed-interval retry on top of [`Bus::send_once`].
//!
//! Agents attach a beat after their tab appears, so the first attempt at a
//! freshly opened tab routinely finds nobody listening. Three attempts a
//! second apart ride out that window without queueing anything.

use crate::bus::{Bus, SendError};
use crate::messages::{Ack, Envelope};
use crate::transport::ContextId;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::debug;

/// Attempts made before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Fixed pause between attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// Retry schedule for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            interval: RETRY_INTERVAL,
        }
    }
}

/// All attempts failed.
#[derive(Debug, Error)]
#[error("delivery to {context} failed after {attempts} attempts: {last}")]
pub struct DeliveryError {
    pub context: ContextId,
    pub attempts: u32,
    #[source]
    pub last: SendError,
}

/// Deliver an envelope with retries. Resolves with the receiver's ack, or
/// with [`DeliveryError`] wrapping the final attempt's failure.
pub async fn deliver(
    bus: &Bus,
    context: ContextId,
    envelope: Envelope,
    policy: RetryPolicy,
) -> Result<Ack, DeliveryError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match bus.send_once(context, envelope.clone()).await {
            Ok(ack) => return Ok(ack),
            Err(err) if attempt < max_attempts => {
                debug!(
                    %context,
                    attempt,
                    message = envelope.message.wire_name(),
                    "delivery attempt failed: {err}, retrying"
                );
                attempt += 1;
                sleep(policy.interval).await;
            }
            Err(err) => {
                return Err(DeliveryError {
                    context,
                    attempts: attempt,
                    last: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn envelope() -> Envelope {
        Envelope::from_router(Message::Alert {
            message: "ping".into(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_exactly_three_attempts_at_fixed_interval() {
        let bus = Arc::new(Bus::new());
        let start = Instant::now();

        let err = deliver(&bus, ContextId(1), envelope(), RetryPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert!(matches!(err.last, SendError::Unreachable(_)));
        // Two inter-attempt pauses of one second each.
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_when_agent_attaches_before_final_attempt() {
        let bus = Arc::new(Bus::new());
        let ctx = ContextId(2);

        let bus_clone = Arc::clone(&bus);
        let agent = tokio::spawn(async move {
            // Attach during the second retry window; the third attempt lands.
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let mut rx = bus_clone.attach(ctx);
            let delivery = rx.recv().await.unwrap();
            delivery.acknowledge(Ack::processing());
        });

        let ack = deliver(&bus, ctx, envelope(), RetryPolicy::default())
            .await
            .unwrap();
        assert!(ack.received);
        assert_eq!(ack.detail.as_deref(), Some("processing"));
        agent.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success_sleeps_nothing() {
        let bus = Arc::new(Bus::new());
        let ctx = ContextId(3);
        let mut rx = bus.attach(ctx);
        tokio::spawn(async move {
            let delivery = rx.recv().await.unwrap();
            delivery.acknowledge(Ack::ok());
        });

        let start = Instant::now();
        let ack = deliver(&bus, ctx, envelope(), RetryPolicy::default())
            .await
            .unwrap();
        assert!(ack.received);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_attempt_policy_still_tries_once() {
        let bus = Arc::new(Bus::new());
        let policy = RetryPolicy {
            max_attempts: 0,
            interval: Duration::from_millis(10),
        };
        let err = deliver(&bus, ContextId(4), envelope(), policy)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }
}
