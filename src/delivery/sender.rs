//! Outbound delivery with optional acknowledgment and bounded retry.
//!
//! In acknowledgment mode every non-binary item is tagged with a fresh
//! identifier. After transmitting it, the sender polls the
//! [`Acknowledgements`] set (fed by inbound `{"ack": "<id>"}` messages)
//! every `ack_poll_interval` up to `ack_poll_attempts` times. An attempt
//! that sees no acknowledgment fails, and the whole delivery is retried up
//! to `delivery_attempts` times before `AppError::Delivery` is returned.
//! The identifier is registered as awaited for the whole delivery and
//! released afterwards, whatever the outcome.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::DeliveryConfig;
use crate::models::chunk::Frame;
use crate::{AppError, Result};

/// Transmission primitive supplied by a transport.
pub trait FrameSink: Send {
    /// Transmit one JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying connection rejects the write.
    fn send_text(&mut self, text: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Transmit one raw binary frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying connection rejects the write.
    fn send_binary(
        &mut self,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

#[derive(Debug, Default)]
struct AckState {
    awaiting: HashSet<String>,
    received: HashSet<String>,
}

/// Acknowledgment bookkeeping shared by a connection's receive and send
/// halves.
///
/// Only identifiers a sender is currently waiting on are recorded; late or
/// unknown acknowledgments are dropped, so the set stays bounded by the
/// number of in-flight deliveries.
#[derive(Debug, Clone, Default)]
pub struct Acknowledgements {
    state: Arc<Mutex<AckState>>,
}

impl Acknowledgements {
    fn lock(&self) -> std::sync::MutexGuard<'_, AckState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an identifier a sender is about to wait on.
    pub fn expect(&self, id: impl Into<String>) {
        self.lock().awaiting.insert(id.into());
    }

    /// Record an acknowledgment received from the peer.
    ///
    /// Returns `false` (and records nothing) when no sender awaits `id`.
    pub fn acknowledge(&self, id: impl Into<String>) -> bool {
        let id = id.into();
        let mut state = self.lock();
        if !state.awaiting.contains(&id) {
            return false;
        }
        state.received.insert(id);
        true
    }

    /// Consume an acknowledgment; returns whether it was present.
    pub fn take(&self, id: &str) -> bool {
        self.lock().received.remove(id)
    }

    /// Stop waiting on `id`, discarding any acknowledgment for it.
    pub fn forget(&self, id: &str) {
        let mut state = self.lock();
        state.awaiting.remove(id);
        state.received.remove(id);
    }

    /// Number of acknowledgments received but not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().received.len()
    }

    /// Number of identifiers senders are waiting on.
    #[must_use]
    pub fn awaiting(&self) -> usize {
        self.lock().awaiting.len()
    }
}

/// Delivery discipline for one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Wait for a peer acknowledgment of every non-binary item.
    pub require_acknowledge: bool,
    /// Whole-delivery attempts.
    pub delivery_attempts: u32,
    /// Acknowledged-set polls per attempt.
    pub ack_poll_attempts: u32,
    /// Pause between polls.
    pub ack_poll_interval: Duration,
    /// Pause between failed attempts.
    pub retry_delay: Duration,
}

impl DeliveryPolicy {
    /// Build a policy from configuration and the current acknowledge flag.
    #[must_use]
    pub fn from_config(config: &DeliveryConfig, require_acknowledge: bool) -> Self {
        Self {
            require_acknowledge,
            delivery_attempts: config.delivery_attempts,
            ack_poll_attempts: config.ack_poll_attempts,
            ack_poll_interval: config.ack_poll_interval(),
            retry_delay: config.retry_delay(),
        }
    }
}

/// Deliver one outbound item through `sink` according to `policy`.
///
/// # Errors
///
/// Returns `AppError::Delivery` after `policy.delivery_attempts` failed
/// attempts, or `AppError::Protocol` if the chunk cannot be serialized.
pub async fn deliver<S>(
    sink: &mut S,
    frame: Frame,
    acks: &Acknowledgements,
    policy: &DeliveryPolicy,
) -> Result<()>
where
    S: FrameSink + ?Sized,
{
    let (payload, ack_id) = match frame {
        Frame::Binary(bytes) => (Payload::Binary(bytes), None),
        Frame::Chunk(mut chunk) => {
            let ack_id = policy.require_acknowledge.then(|| {
                let id = Uuid::new_v4().to_string();
                chunk.id = Some(id.clone());
                id
            });
            (Payload::Text(serde_json::to_string(&chunk)?), ack_id)
        }
    };

    if let Some(id) = &ack_id {
        acks.expect(id.clone());
    }
    let result = attempt_all(sink, &payload, ack_id.as_deref(), acks, policy).await;
    if let Some(id) = &ack_id {
        acks.forget(id);
    }
    result
}

async fn attempt_all<S>(
    sink: &mut S,
    payload: &Payload,
    ack_id: Option<&str>,
    acks: &Acknowledgements,
    policy: &DeliveryPolicy,
) -> Result<()>
where
    S: FrameSink + ?Sized,
{
    for attempt in 1..=policy.delivery_attempts {
        match attempt_once(sink, payload, ack_id, acks, policy).await {
            Ok(()) => {
                debug!(attempt, "outbound item delivered");
                return Ok(());
            }
            Err(err) => {
                warn!(attempt, %err, "delivery attempt failed");
                if attempt < policy.delivery_attempts {
                    sleep(policy.retry_delay).await;
                }
            }
        }
    }

    Err(AppError::Delivery(format!(
        "failed to deliver after {} attempts",
        policy.delivery_attempts
    )))
}

enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

async fn attempt_once<S>(
    sink: &mut S,
    payload: &Payload,
    ack_id: Option<&str>,
    acks: &Acknowledgements,
    policy: &DeliveryPolicy,
) -> Result<()>
where
    S: FrameSink + ?Sized,
{
    match payload {
        Payload::Binary(bytes) => return sink.send_binary(bytes.clone()).await,
        Payload::Text(text) => sink.send_text(text.clone()).await?,
    }

    let Some(id) = ack_id else {
        return Ok(());
    };

    for _ in 0..policy.ack_poll_attempts {
        if acks.take(id) {
            return Ok(());
        }
        sleep(policy.ack_poll_interval).await;
    }
    Err(AppError::Delivery(format!(
        "acknowledgement not received for {id}"
    )))
}
