//! In-process event bus with fault injection.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;

use crate::bus::{BusController, EventBus, Subscription};
use crate::error::EnvError;
use crate::types::{Envelope, Topic};

/// A registered subscription on the local bus.
struct Subscriber {
    consumer: String,
    topics: HashSet<Topic>,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// In-process publish/subscribe bus.
///
/// Each subscription owns an unbounded channel, so a slow consumer never
/// blocks a publisher (components publish from inside their own handlers,
/// and a bounded channel could deadlock the round-start / round-completed
/// cycle).
pub struct LocalBus {
    /// Registered subscriptions
    subscribers: RwLock<Vec<Subscriber>>,

    /// Per-topic loss probability (0.0 - 1.0)
    drop_rates: Mutex<HashMap<Topic, f64>>,

    /// Envelopes accepted by `publish`
    published: AtomicU64,

    /// Envelopes lost to injected faults
    dropped: AtomicU64,

    /// Set once `close` was called
    closed: AtomicBool,
}

impl LocalBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            drop_rates: Mutex::new(HashMap::new()),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Creates an Arc-wrapped bus for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Shuts the bus down. Pending envelopes stay readable; every
    /// subscription returns `None` once drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Returns true once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Total envelopes accepted by `publish` (including lost ones).
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn should_drop(&self, topic: Topic) -> bool {
        let rate = self
            .drop_rates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .copied()
            .unwrap_or(0.0);

        rate > 0.0 && rand::thread_rng().gen_bool(rate)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, envelope: Envelope) -> Result<usize, EnvError> {
        if self.is_closed() {
            return Err(EnvError::closed(format!("publish on {}", envelope.topic)));
        }
        self.published.fetch_add(1, Ordering::Relaxed);

        if self.should_drop(envelope.topic) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(topic = %envelope.topic, id = %envelope.id, "envelope dropped by fault injection");
            return Ok(0);
        }

        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut delivered = 0;
        for subscriber in subscribers.iter().filter(|s| s.topics.contains(&envelope.topic)) {
            if subscriber.tx.send(envelope.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::trace!(consumer = %subscriber.consumer, "subscription gone, skipping");
            }
        }

        Ok(delivered)
    }

    fn subscribe(&self, consumer: &str, topics: &[Topic]) -> Result<Subscription, EnvError> {
        if self.is_closed() {
            return Err(EnvError::closed(format!("subscribe by {}", consumer)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                consumer: consumer.to_string(),
                topics: topics.iter().copied().collect(),
                tx,
            });

        Ok(Subscription::new(consumer, rx))
    }
}

impl BusController for LocalBus {
    fn set_drop_rate(&self, topic: Topic, rate: f64) {
        let mut rates = self.drop_rates.lock().unwrap_or_else(PoisonError::into_inner);
        rates.insert(topic, rate.clamp(0.0, 1.0));
    }

    fn heal_all(&self) {
        let mut rates = self.drop_rates.lock().unwrap_or_else(PoisonError::into_inner);
        rates.clear();
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
