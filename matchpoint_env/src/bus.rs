//! Publish/subscribe abstraction between Matchpoint components.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EnvError;
use crate::types::{Envelope, Topic};

/// Abstraction for topic-based event delivery between components.
///
/// # Implementations
///
/// - **In-process**: `LocalBus` - fan-out over tokio channels, with
///   fault injection through [`BusController`]
///
/// # Delivery
///
/// ```text
/// Publisher                  Bus                     Subscribers
///   |                         |                           |
///   |-- publish(envelope) --->|                           |
///   |                         |-- [topic match] --------->| consumer A
///   |                         |-- [topic match] --------->| consumer B
/// ```
///
/// Every subscription whose topic set contains the envelope's topic
/// receives its own copy. Envelopes from one publisher reach a given
/// subscription in publish order. Delivery is at-most-once: nothing is
/// retried and nothing is de-duplicated.
#[async_trait]
pub trait EventBus: Send + Sync + 'static {
    /// Publishes an envelope to every subscription on its topic.
    ///
    /// # Returns
    /// * `Ok(n)` - Number of subscriptions the envelope was handed to
    /// * `Err(EnvError::BusClosed)` - The bus has been shut down
    async fn publish(&self, envelope: Envelope) -> Result<usize, EnvError>;

    /// Registers a consumer for a set of topics.
    ///
    /// # Arguments
    /// * `consumer` - Consumer name (for logging)
    /// * `topics` - Topics the subscription receives
    fn subscribe(&self, consumer: &str, topics: &[Topic]) -> Result<Subscription, EnvError>;
}

/// Receiving end of a bus subscription.
pub struct Subscription {
    consumer: String,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Subscription {
    /// Wraps a channel receiver.
    pub fn new(consumer: impl Into<String>, rx: mpsc::UnboundedReceiver<Envelope>) -> Self {
        Self {
            consumer: consumer.into(),
            rx,
        }
    }

    /// Receives the next envelope.
    ///
    /// # Returns
    /// * `Some(envelope)` - An envelope arrived
    /// * `None` - The bus was closed (shutdown)
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Returns the next envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Drains every envelope queued right now.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.try_recv() {
            envelopes.push(envelope);
        }
        envelopes
    }

    /// Returns the consumer name.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

/// Fault injection on a bus.
///
/// Allows the harness to lose envelopes on chosen topics.
pub trait BusController: Send + Sync {
    /// Sets the probability (0.0 - 1.0) that an envelope on `topic` is lost.
    fn set_drop_rate(&self, topic: Topic, rate: f64);

    /// Removes every injected fault.
    fn heal_all(&self);

    /// Total envelopes lost to injected faults.
    fn dropped(&self) -> u64;
}
